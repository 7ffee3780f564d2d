pub mod bot;
pub mod error;
pub mod logging;
pub mod panel;
pub mod runtime_paths;
pub mod settings;
pub mod token;

pub use error::FireflyPanelError;

pub type Result<T> = std::result::Result<T, FireflyPanelError>;
