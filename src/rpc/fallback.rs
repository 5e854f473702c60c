//! Deterministic replies used while the reasoning backend is unreachable.

/// Produce a canned reply for `prompt` from keyword rules.
///
/// Never fails and never touches the network, so the user-facing path
/// always has something to say.
#[must_use]
pub fn synthesize(prompt: &str) -> String {
    let lower = prompt.to_lowercase();
    let has_word = |word: &str| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == word)
    };

    if has_word("hello") || has_word("hi") {
        "Hello! My reasoning engine is offline right now, but I received your message and will \
         follow up once it is back."
            .into()
    } else if has_word("status") {
        "System status: core services running, reasoning engine OFFLINE. Queued work will \
         resume when the backend reconnects."
            .into()
    } else if has_word("help") {
        "I can queue tasks, track missions, and report status. Advanced reasoning is unavailable \
         while the backend is offline."
            .into()
    } else if lower.contains("who are you") {
        "I am Steward, your local agent daemon. My reasoning engine is currently offline.".into()
    } else {
        "My reasoning engine is offline at the moment. I have noted your request; please try \
         again shortly."
            .into()
    }
}
