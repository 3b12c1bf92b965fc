use serde::{Deserialize, Serialize};

/// Emotional tag of a dialogue line. Ordered by classification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Intense,
    Romantic,
    Comedic,
    Negative,
    Positive,
    Neutral,
}

const EMOTION_KEYWORDS: &[(Emotion, &[&str])] = &[
    (
        Emotion::Intense,
        &["now", "run", "fight", "stop", "must", "war", "attack", "danger", "kill", "die"],
    ),
    (
        Emotion::Romantic,
        &["heart", "together", "always", "forever", "kiss", "love", "feel"],
    ),
    (
        Emotion::Comedic,
        &["ha", "funny", "joke", "laugh", "silly", "weird", "crazy"],
    ),
    (
        Emotion::Negative,
        &["hate", "lost", "never", "dead", "fail", "cry", "wrong", "afraid"],
    ),
    (
        Emotion::Positive,
        &["happy", "wonderful", "hope", "proud", "yes", "win", "joy", "great", "safe"],
    ),
];

impl Emotion {
    /// Contribution of this emotion to the dialogue-weight signal.
    pub fn weight(self) -> f64 {
        match self {
            Emotion::Intense => 1.0,
            Emotion::Romantic => 0.7,
            Emotion::Negative => 0.6,
            Emotion::Comedic => 0.5,
            Emotion::Positive => 0.4,
            Emotion::Neutral => 0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Intense => "intense",
            Emotion::Romantic => "romantic",
            Emotion::Comedic => "comedic",
            Emotion::Negative => "negative",
            Emotion::Positive => "positive",
            Emotion::Neutral => "neutral",
        }
    }
}

/// Keyword classification of a subtitle line; first matching group wins.
pub fn classify_emotion(text: &str) -> Emotion {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    for (emotion, keywords) in EMOTION_KEYWORDS {
        if words.iter().any(|w| keywords.contains(&w.as_str())) {
            return *emotion;
        }
    }
    Emotion::Neutral
}

/// One subtitle line as delivered by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueEvent {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
    /// Tag supplied by ingestion; derived from the text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
}

impl DialogueEvent {
    pub fn new(start_s: f64, end_s: f64, text: impl Into<String>) -> Self {
        DialogueEvent {
            start_s,
            end_s,
            text: text.into(),
            emotion: None,
        }
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = Some(emotion);
        self
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion.unwrap_or_else(|| classify_emotion(&self.text))
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start_s <= t && t <= self.end_s
    }

    fn distance_to(&self, t: f64) -> f64 {
        if self.contains(t) {
            0.0
        } else {
            (t - self.start_s).abs().min((t - self.end_s).abs())
        }
    }
}

/// Event covering `t`, else the nearest event within `window_s` of it.
/// Earlier events win exact distance ties.
pub fn nearest_event(events: &[DialogueEvent], t: f64, window_s: f64) -> Option<&DialogueEvent> {
    if let Some(covering) = events.iter().find(|e| e.contains(t)) {
        return Some(covering);
    }

    let mut best: Option<(&DialogueEvent, f64)> = None;
    for event in events {
        let dist = event.distance_to(t);
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((event, dist)),
        }
    }

    best.filter(|(_, dist)| *dist <= window_s).map(|(e, _)| e)
}

/// Emotional weight of the dialogue around `t`; 0 when nothing is said nearby.
pub fn emotional_weight_at(events: &[DialogueEvent], t: f64, window_s: f64) -> f64 {
    nearest_event(events, t, window_s)
        .map(|e| e.emotion().weight())
        .unwrap_or(0.0)
}
