pub mod distro;
pub mod report;
