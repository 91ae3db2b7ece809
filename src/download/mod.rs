pub mod completion;
pub mod cursor;
pub mod reconstruct;
pub mod session;
pub mod stream;

pub use cursor::FileCursorStore;
pub use session::{DownloadSettings, GadgetDownloader};
