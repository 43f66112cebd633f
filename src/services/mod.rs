//! Service layer for file I/O

pub mod io;

pub use io::ImageIOService;
