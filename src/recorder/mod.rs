pub mod click_listener;
pub mod fingerprint;
pub mod matcher;
pub mod session;
pub mod storage;
pub mod types;

pub use click_listener::PressListener;
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use session::EditSession;
pub use storage::{RecordingStore, StorageError};
pub use types::{Recording, Step};
