pub mod completer;
pub mod content;
pub mod handle;
pub mod scanning;
pub mod single;

pub use completer::{CompletionEnv, CompletionPhase, GroupCompleter, GroupSummary, RetryPolicy};
pub use content::{Feedback, LazyContent, LazySupport, ProgressFeedback};
pub use handle::CompletionHandle;
pub use scanning::ScanningBuilder;
pub use single::SingleGroupBuilder;
