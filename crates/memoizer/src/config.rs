use serde::Deserialize;

/// Configuration of a single memoizer instance.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoConfig {
    /// The name used to tag logs and metrics of this memoizer.
    pub name: String,
    /// The number of requests that can be queued for the worker of a [`MemoActor`](crate::MemoActor)
    /// before `get` has to wait.
    ///
    /// The lock based [`Memo`](crate::Memo) does not queue requests and ignores this.
    pub request_queue_size: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            name: "memo".into(),
            // hand requests to the worker one at a time
            request_queue_size: 1,
        }
    }
}

impl MemoConfig {
    /// Creates a default configuration with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
