pub mod configuration;
pub mod identity;
pub mod preferences;

pub use configuration::{
    CategoryDef, CategoryTranslation, ConsentMode, ConsentPolicy, Configuration, Element,
    ElementType, InitialCategories, Layer, Layout,
};
pub use identity::{EventIdentity, SessionId, UniqueId};
pub use preferences::{CategoryConsent, Preferences};
