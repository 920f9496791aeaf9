//! Step definitions — what each onboarding step asks and how it is answered.

use std::path::PathBuf;

use serde::Serialize;

use crate::gateway::RoleId;

/// Longest nickname the chat platform accepts.
pub const MAX_NICKNAME_CHARS: usize = 32;

/// Decides whether a step is skipped when it comes up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipRule {
    Never,
    IfAvatarSet,
    IfAccountLinked,
    /// Grant the role before the step is asked. Never skips.
    UnlockRole(RoleId),
}

/// Checks a text answer before it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerValidator {
    Any,
    /// A single word that fits in a nickname.
    FirstName,
}

impl AnswerValidator {
    /// Returns the error text to show the member, or `None` if the answer is accepted.
    pub fn validate(&self, answer: &str) -> Option<String> {
        match self {
            Self::Any => None,
            Self::FirstName => {
                let name = answer.trim();
                if name.is_empty() {
                    Some("I didn't catch that. What is your *first* name, please?".to_string())
                } else if name.contains(char::is_whitespace) {
                    Some(format!(
                        "you wrote \"{answer}\" but that answer includes a space. What is your *first* name, please?"
                    ))
                } else if name.chars().count() > MAX_NICKNAME_CHARS {
                    Some(format!(
                        "\"{name}\" is longer than {MAX_NICKNAME_CHARS} characters. What is your *first* name, please?"
                    ))
                } else {
                    None
                }
            }
        }
    }
}

/// Side effect applied once a text answer is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerAction {
    None,
    SetNickname,
}

/// External condition an `ExternalPoll` step waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollCondition {
    AvatarSet,
    AccountLinked,
}

/// How a step is answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// The member types an answer.
    TextAnswer {
        validator: AnswerValidator,
        action: AnswerAction,
    },
    /// The member clicks a reaction; typing is disabled meanwhile.
    ReactionGate { emoji: String },
    /// Completed by a condition outside the chat, polled until it holds.
    ExternalPoll { condition: PollCondition },
    /// Posted and moved past without waiting.
    Informational,
}

/// One step of the onboarding catalog. Its position is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingStep {
    pub question: String,
    pub help: Option<String>,
    pub attachment: Option<PathBuf>,
    pub success_message: Option<String>,
    pub skip: SkipRule,
    pub kind: StepKind,
}

impl OnboardingStep {
    fn with_kind(question: impl Into<String>, kind: StepKind) -> Self {
        Self {
            question: question.into(),
            help: None,
            attachment: None,
            success_message: None,
            skip: SkipRule::Never,
            kind,
        }
    }

    pub fn text(
        question: impl Into<String>,
        validator: AnswerValidator,
        action: AnswerAction,
    ) -> Self {
        Self::with_kind(question, StepKind::TextAnswer { validator, action })
    }

    pub fn reaction(question: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self::with_kind(
            question,
            StepKind::ReactionGate {
                emoji: emoji.into(),
            },
        )
    }

    pub fn poll(question: impl Into<String>, condition: PollCondition) -> Self {
        Self::with_kind(question, StepKind::ExternalPoll { condition })
    }

    pub fn informational(question: impl Into<String>) -> Self {
        Self::with_kind(question, StepKind::Informational)
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }

    pub fn with_success(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn with_skip(mut self, skip: SkipRule) -> Self {
        self.skip = skip;
        self
    }

    /// The emoji the member has to click, for reaction-gated steps.
    pub fn expected_reaction(&self) -> Option<&str> {
        match &self.kind {
            StepKind::ReactionGate { emoji } => Some(emoji),
            _ => None,
        }
    }

    /// Whether the step is processed as soon as it is asked, with an empty answer.
    pub fn process_immediately(&self) -> bool {
        matches!(
            self.kind,
            StepKind::ExternalPoll { .. } | StepKind::Informational
        )
    }

    /// Validate an answer. Only text answers carry a validator.
    pub fn validate(&self, answer: &str) -> Option<String> {
        match &self.kind {
            StepKind::TextAnswer { validator, .. } => validator.validate(answer),
            _ => None,
        }
    }
}
