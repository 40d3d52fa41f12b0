pub mod dispatcher;
pub mod replicate;
pub mod style;

pub use dispatcher::{FallbackReason, ImageDispatcher, ImageResult, ReferenceImage};
pub use replicate::ProviderSettings;
pub use style::Style;
