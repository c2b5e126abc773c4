pub mod archive;
pub mod inspiration;
pub mod persistence;
pub mod saved;
pub mod store;

pub use archive::{export_archive, parse_archive, ImportError, PendingImport};
pub use inspiration::{InspirationSettings, DEFAULT_INSPIRATION_KEYWORDS};
pub use persistence::{load_library, save_inspiration, save_library, save_saved_models, Library};
pub use saved::{GeneratedModel, SavedModel};
pub use store::LocalStore;
