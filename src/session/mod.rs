pub mod flow;
pub mod store;

pub use flow::{FlowError, ReadyRequest, StoredPhoto, WizardSession, WizardStep};
pub use store::{DispatchGuard, SessionKey, SessionStore};
