pub mod feed;

#[cfg(target_os = "macos")]
pub mod macos;
