pub mod bundle;
pub mod error;
pub mod image_codec;
pub mod lax_json;
pub mod localize;
pub mod manifest;
pub mod pack;
pub mod path_safety;
pub mod path_util;
pub mod texture;

pub use bundle::{Bundle, Entry, EntryKind};
pub use error::{Result, RuckError};
pub use manifest::{EntryCategory, ManifestDriver, StatusEvent};
pub use texture::Texture;
