//! Regex-rule intent prefilter that decides whether a message needs the
//! LLM at all, plus parsing of messaging-channel admin commands.

mod commands;

pub use commands::{parse_channel_command, tier_level, CommandTier, ParsedCommand};

use regex::Regex;

/// Classified intent of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Command,
    Question,
    ConfigChange,
    AutomationRequest,
    EmergencyAlert,
    Chat,
}

/// Output of the intent parser.
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
}

impl IntentResult {
    /// False for intents served without the agent loop.
    pub fn needs_llm(&self) -> bool {
        !matches!(
            self.intent,
            Intent::Command | Intent::ConfigChange | Intent::EmergencyAlert
        )
    }
}

struct Rule {
    pattern: Regex,
    intent: Intent,
}

/// Ordered regex rules applied to the lowercased message; first match wins.
pub struct IntentParser {
    rules: Vec<Rule>,
}

impl IntentParser {
    pub fn new() -> Self {
        let mut parser = Self { rules: Vec::new() };
        parser.add_default_rules();
        parser
    }

    fn add_default_rules(&mut self) {
        // Config commands
        self.add_rule(r"^/config\s+", Intent::ConfigChange);
        self.add_rule(r"^config\s+(get|set)\s+", Intent::ConfigChange);

        // Direct command execution (e.g. "run ls -la")
        self.add_rule(r"^/run\s+", Intent::Command);
        self.add_rule(r"^run\s+", Intent::Command);
        self.add_rule(r"^!", Intent::Command); // shell escape

        // Cron/schedule
        self.add_rule(r"^/cron\s+", Intent::AutomationRequest);
        self.add_rule(r"^schedule\s+", Intent::AutomationRequest);

        // Emergency/alert
        self.add_rule(r"^/alert\s+", Intent::EmergencyAlert);
        self.add_rule(r"^urgent:", Intent::EmergencyAlert);
    }

    /// Register a rule. Invalid patterns are skipped.
    pub fn add_rule(&mut self, pattern: &str, intent: Intent) {
        if let Ok(re) = Regex::new(pattern) {
            self.rules.push(Rule {
                pattern: re,
                intent,
            });
        }
    }

    /// Classify a message; unmatched content is `Chat`.
    pub fn parse(&self, content: &str) -> IntentResult {
        let content = content.trim();
        if content.is_empty() {
            return IntentResult {
                intent: Intent::Chat,
            };
        }
        let lower = content.to_lowercase();
        for rule in &self.rules {
            if rule.pattern.is_match(&lower) {
                return IntentResult { intent: rule.intent };
            }
        }
        IntentResult {
            intent: Intent::Chat,
        }
    }
}

impl Default for IntentParser {
    fn default() -> Self {
        Self::new()
    }
}
