//! Canned replies used when the backend cannot be reached

use rand::seq::SliceRandom;

const APOLOGIES: &[&str] = &[
    "Sorry, I'm having trouble thinking right now. Please try again in a moment.",
    "Apologies, something went wrong on my side. Could you ask me again?",
    "I couldn't reach my language model just now. Please try again shortly.",
    "Sorry, I lost my train of thought. Mind repeating that?",
    "Something went wrong while I was working on that. Please try again later.",
];

/// A randomly chosen apology
pub fn random_apology() -> &'static str {
    APOLOGIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(APOLOGIES[0])
}

/// Whether `text` is one of the canned apologies
pub fn is_apology(text: &str) -> bool {
    APOLOGIES.contains(&text)
}
