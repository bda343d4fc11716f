/// External collaborators consumed by task logic
///
/// The relevance classifier, the legacy publishing pipeline and the operator channel
/// live outside this service. Each one sits behind a trait so tasks and callbacks can
/// be exercised without the real systems.

pub mod classifier;
pub mod notifier;
pub mod publisher;

pub use classifier::{Classifier, DisabledClassifier, HttpClassifier};
pub use notifier::{OperatorNotifier, TracingNotifier};
pub use publisher::{HttpPublisher, LoggingPublisher, Publisher};
