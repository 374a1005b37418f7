pub mod changed;
pub mod notify;

pub use changed::{ChangedEvent, ListenerId};
pub use notify::{NotifyContext, NotifyThread};
