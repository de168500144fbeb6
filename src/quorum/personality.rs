//! Agent personalities: declarative bundles of display name, system prompt,
//! numeric dials, and a communication style.
//!
//! Personalities are plain data — there is no behaviour hierarchy.  Presets
//! ([`Personality::analyst`], [`Personality::critic`], …) are concrete records;
//! custom personalities come out of [`PersonalityBuilder`], which clamps the
//! numeric dials into `[0, 1]`.
//!
//! # Example
//!
//! ```rust
//! use quorum::personality::{CommunicationStyle, Personality};
//!
//! let skeptic = Personality::builder("Skeptic")
//!     .description("Questions every assumption")
//!     .system_prompt("You challenge claims and demand evidence.")
//!     .creativity(0.3)
//!     .precision(0.9)
//!     .style(CommunicationStyle::Direct)
//!     .trait_hint("bias", "negative evidence")
//!     .build();
//!
//! assert_eq!(skeptic.precision, 0.9);
//!
//! // Out-of-range dials are clamped, not rejected.
//! let wild = Personality::builder("Wild").creativity(7.0).build();
//! assert_eq!(wild.creativity, 1.0);
//! ```

use std::collections::BTreeMap;

/// Communication register attached to a [`Personality`].
///
/// Each style contributes a short suffix to the agent's effective system
/// prompt; see [`CommunicationStyle::prompt_suffix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommunicationStyle {
    /// No stylistic steering.
    #[default]
    Balanced,
    /// Professional, structured register.
    Formal,
    /// Conversational, approachable register.
    Casual,
    /// Precise terminology, assumes domain literacy.
    Technical,
    /// Short sentences, no filler.
    Concise,
    /// Blunt; leads with the conclusion.
    Direct,
}

impl CommunicationStyle {
    /// The style-specific instruction appended to the agent's system prompt.
    pub fn prompt_suffix(&self) -> &'static str {
        match self {
            CommunicationStyle::Balanced => "",
            CommunicationStyle::Formal => {
                "Communicate in a formal, professional register with structured arguments."
            }
            CommunicationStyle::Casual => {
                "Communicate conversationally, as if talking to a colleague."
            }
            CommunicationStyle::Technical => {
                "Use precise technical terminology and assume domain literacy."
            }
            CommunicationStyle::Concise => {
                "Be concise. Prefer short sentences and omit filler."
            }
            CommunicationStyle::Direct => {
                "Be direct. Lead with your conclusion, then justify it."
            }
        }
    }

    /// Parse a style from its lowercase config key.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "balanced" => Some(CommunicationStyle::Balanced),
            "formal" => Some(CommunicationStyle::Formal),
            "casual" => Some(CommunicationStyle::Casual),
            "technical" => Some(CommunicationStyle::Technical),
            "concise" => Some(CommunicationStyle::Concise),
            "direct" => Some(CommunicationStyle::Direct),
            _ => None,
        }
    }
}

/// A declarative persona for one agent.
///
/// The `system_prompt` is the seed for the agent's implicit system message;
/// [`Agent`](crate::agent::Agent) augments it with `expertise`, `traits`, and the
/// style suffix at request time.  `creativity` doubles as the default sampling
/// temperature.
#[derive(Debug, Clone)]
pub struct Personality {
    /// Display name (e.g. `"Analyst"`).
    pub name: String,
    /// One-line description of the persona.
    pub description: String,
    /// Base system prompt.
    pub system_prompt: String,
    /// Free-form trait map embedded into the effective system prompt.
    pub traits: BTreeMap<String, String>,
    /// Creativity dial in `[0, 1]`; used as the default temperature.
    pub creativity: f64,
    /// Precision dial in `[0, 1]`.
    pub precision: f64,
    /// Optional domain expertise tag.
    pub expertise: Option<String>,
    /// Communication register.
    pub style: CommunicationStyle,
}

impl Personality {
    /// Start building a custom personality.
    pub fn builder(name: impl Into<String>) -> PersonalityBuilder {
        PersonalityBuilder::new(name)
    }

    /// Methodical, evidence-driven persona.
    pub fn analyst() -> Self {
        Personality::builder("Analyst")
            .description("Methodical thinker who grounds every claim in evidence")
            .system_prompt(
                "You are a rigorous analyst. Break problems into parts, weigh evidence \
                 explicitly, and quantify uncertainty where you can.",
            )
            .creativity(0.3)
            .precision(0.9)
            .style(CommunicationStyle::Technical)
            .build()
    }

    /// Divergent, idea-generating persona.
    pub fn creative() -> Self {
        Personality::builder("Creative")
            .description("Generates unconventional options before judging them")
            .system_prompt(
                "You are a creative thinker. Offer unexpected angles and analogies; \
                 prefer breadth of ideas over early convergence.",
            )
            .creativity(0.9)
            .precision(0.4)
            .style(CommunicationStyle::Casual)
            .build()
    }

    /// Adversarial reviewer persona.
    pub fn critic() -> Self {
        Personality::builder("Critic")
            .description("Hunts for flaws, gaps, and failure modes")
            .system_prompt(
                "You are a critic. Identify weaknesses, missing assumptions, and risks \
                 in any proposal before acknowledging its strengths.",
            )
            .creativity(0.4)
            .precision(0.8)
            .style(CommunicationStyle::Direct)
            .build()
    }

    /// Consensus-seeking persona.
    pub fn diplomat() -> Self {
        Personality::builder("Diplomat")
            .description("Finds common ground between competing positions")
            .system_prompt(
                "You are a diplomat. Surface where positions agree, reframe conflicts \
                 as trade-offs, and propose syntheses both sides could accept.",
            )
            .creativity(0.5)
            .precision(0.6)
            .style(CommunicationStyle::Formal)
            .build()
    }

    /// Domain-expert persona for the given field.
    pub fn expert(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Personality::builder(format!("{} Expert", domain))
            .description(format!("Deep specialist in {}", domain))
            .system_prompt(format!(
                "You are a recognized expert in {}. Answer from deep domain knowledge \
                 and flag where the question leaves your specialty.",
                domain
            ))
            .creativity(0.4)
            .precision(0.85)
            .expertise(domain)
            .style(CommunicationStyle::Technical)
            .build()
    }

    /// Resolve a preset key: `analyst`, `creative`, `critic`, `diplomat`, or
    /// `expert:<domain>`.
    pub fn from_preset(key: &str) -> Option<Self> {
        let key = key.trim();
        if let Some(domain) = key.strip_prefix("expert:") {
            let domain = domain.trim();
            if domain.is_empty() {
                return None;
            }
            return Some(Personality::expert(domain));
        }
        match key.to_lowercase().as_str() {
            "analyst" => Some(Personality::analyst()),
            "creative" => Some(Personality::creative()),
            "critic" => Some(Personality::critic()),
            "diplomat" => Some(Personality::diplomat()),
            _ => None,
        }
    }
}

/// Fluent builder for custom [`Personality`] records.
///
/// `creativity` and `precision` are clamped into `[0, 1]` at
/// [`build`](PersonalityBuilder::build) time.
pub struct PersonalityBuilder {
    name: String,
    description: String,
    system_prompt: String,
    traits: BTreeMap<String, String>,
    creativity: f64,
    precision: f64,
    expertise: Option<String>,
    style: CommunicationStyle,
}

impl PersonalityBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            traits: BTreeMap::new(),
            creativity: 0.7,
            precision: 0.7,
            expertise: None,
            style: CommunicationStyle::Balanced,
        }
    }

    /// Set the one-line description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the base system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Add a free-form trait hint (key/value embedded into the system prompt).
    pub fn trait_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }

    /// Set the creativity dial (clamped to `[0, 1]` at build).
    pub fn creativity(mut self, creativity: f64) -> Self {
        self.creativity = creativity;
        self
    }

    /// Set the precision dial (clamped to `[0, 1]` at build).
    pub fn precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    /// Attach a domain expertise tag.
    pub fn expertise(mut self, expertise: impl Into<String>) -> Self {
        self.expertise = Some(expertise.into());
        self
    }

    /// Set the communication style.
    pub fn style(mut self, style: CommunicationStyle) -> Self {
        self.style = style;
        self
    }

    /// Finalise the personality, clamping the numeric dials.
    pub fn build(self) -> Personality {
        Personality {
            name: self.name,
            description: self.description,
            system_prompt: self.system_prompt,
            traits: self.traits,
            creativity: self.creativity.clamp(0.0, 1.0),
            precision: self.precision.clamp(0.0, 1.0),
            expertise: self.expertise,
            style: self.style,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_dials() {
        let p = Personality::builder("X").creativity(-3.0).precision(1.5).build();
        assert_eq!(p.creativity, 0.0);
        assert_eq!(p.precision, 1.0);
    }

    #[test]
    fn preset_keys_resolve() {
        assert_eq!(Personality::from_preset("analyst").unwrap().name, "Analyst");
        assert_eq!(Personality::from_preset("Critic").unwrap().name, "Critic");
        let sec = Personality::from_preset("expert:security").unwrap();
        assert_eq!(sec.expertise.as_deref(), Some("security"));
        assert!(Personality::from_preset("expert:").is_none());
        assert!(Personality::from_preset("wizard").is_none());
    }

    #[test]
    fn style_keys_resolve() {
        assert_eq!(
            CommunicationStyle::from_key("Technical"),
            Some(CommunicationStyle::Technical)
        );
        assert_eq!(CommunicationStyle::from_key("nope"), None);
    }
}
