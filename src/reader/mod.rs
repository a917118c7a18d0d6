pub mod category;
pub mod loader;
pub mod prompt;
pub mod scroll;
pub mod session;
pub mod settings;
pub mod tags;

pub use loader::{ImageLoader, Surface, Ticket};
pub use scroll::Viewport;
pub use session::{Notice, Reader, ReaderUi};
pub use settings::{Settings, SettingsFile};
