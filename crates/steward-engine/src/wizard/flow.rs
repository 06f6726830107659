//! Wizard kinds, steps and step validators.
//!
//! Transitions are a per-kind table of steps walked in order; after the last
//! step the flow reaches [`StepId::Commit`]. The draft at commit holds exactly
//! one key per step, whatever path the operator took through optional and
//! loop steps.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use steward_core::ActionCategory;

use crate::error::ValidationError;

const MAX_NAME_LEN: usize = 120;
const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_SHORT_LEN: usize = 60;

/// Guided flows the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardKind {
    CreateProduct,
    CreateCategory,
}

impl WizardKind {
    /// Registry action that starts the flow and is audited on commit.
    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateProduct => "create_product",
            Self::CreateCategory => "create_category",
        }
    }

    /// Entity kind passed to the domain service.
    pub fn entity_kind(&self) -> &'static str {
        match self {
            Self::CreateProduct => "product",
            Self::CreateCategory => "category",
        }
    }

    pub fn category(&self) -> ActionCategory {
        match self {
            Self::CreateProduct => ActionCategory::Product,
            Self::CreateCategory => ActionCategory::Category,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::CreateProduct => "New product",
            Self::CreateCategory => "New category",
        }
    }

    /// Steps in order.
    pub fn steps(&self) -> &'static [Step] {
        match self {
            Self::CreateProduct => PRODUCT_STEPS,
            Self::CreateCategory => CATEGORY_STEPS,
        }
    }

    pub fn first_step(&self) -> StepId {
        self.steps()[0].id
    }

    /// The step after `current`, or `Commit` after the last one.
    pub fn next_step(&self, current: StepId) -> StepId {
        let steps = self.steps();
        steps
            .iter()
            .position(|s| s.id == current)
            .and_then(|i| steps.get(i + 1))
            .map_or(StepId::Commit, |s| s.id)
    }

    pub fn step(&self, id: StepId) -> Option<&'static Step> {
        self.steps().iter().find(|s| s.id == id)
    }

    /// Draft keys present at commit.
    pub fn fields(&self) -> Vec<&'static str> {
        self.steps().iter().map(|s| s.id.field()).collect()
    }
}

/// Step identifiers. Each data step fills the draft field of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Name,
    Description,
    Price,
    Category,
    Size,
    Photos,
    Video,
    Stock,
    Weight,
    /// All data collected; waiting for the domain service to accept it.
    Commit,
}

impl StepId {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Price => "price",
            Self::Category => "category",
            Self::Size => "size",
            Self::Photos => "photos",
            Self::Video => "video",
            Self::Stock => "stock",
            Self::Weight => "weight",
            Self::Commit => "commit",
        }
    }
}

/// What a step accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepInput {
    /// One text answer checked by a rule.
    Text(Rule),
    /// Zero or more photos until Done or the upper bound.
    PhotoLoop,
    /// One video, or Skip.
    OptionalVideo,
}

/// A step of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub id: StepId,
    pub prompt: &'static str,
    pub input: StepInput,
}

const PRODUCT_STEPS: &[Step] = &[
    Step {
        id: StepId::Name,
        prompt: "What is the product called?",
        input: StepInput::Text(Rule::Text { max: MAX_NAME_LEN }),
    },
    Step {
        id: StepId::Description,
        prompt: "Describe the product in a few sentences.",
        input: StepInput::Text(Rule::Text {
            max: MAX_DESCRIPTION_LEN,
        }),
    },
    Step {
        id: StepId::Price,
        prompt: "What is the price? (e.g. 19.99)",
        input: StepInput::Text(Rule::Price),
    },
    Step {
        id: StepId::Category,
        prompt: "Which category does it belong to?",
        input: StepInput::Text(Rule::Text { max: MAX_SHORT_LEN }),
    },
    Step {
        id: StepId::Size,
        prompt: "Size or dimensions? (e.g. M, or 30x20 cm)",
        input: StepInput::Text(Rule::Text { max: MAX_SHORT_LEN }),
    },
    Step {
        id: StepId::Photos,
        prompt: "Send product photos one at a time. Press Done when finished.",
        input: StepInput::PhotoLoop,
    },
    Step {
        id: StepId::Video,
        prompt: "Send a short video, or press Skip.",
        input: StepInput::OptionalVideo,
    },
    Step {
        id: StepId::Stock,
        prompt: "How many are in stock?",
        input: StepInput::Text(Rule::Stock),
    },
    Step {
        id: StepId::Weight,
        prompt: "Shipping weight in kg? (e.g. 0.5)",
        input: StepInput::Text(Rule::Weight),
    },
];

const CATEGORY_STEPS: &[Step] = &[
    Step {
        id: StepId::Name,
        prompt: "What is the category called?",
        input: StepInput::Text(Rule::Text { max: MAX_SHORT_LEN }),
    },
    Step {
        id: StepId::Description,
        prompt: "Describe the category in one or two sentences.",
        input: StepInput::Text(Rule::Text {
            max: MAX_DESCRIPTION_LEN,
        }),
    },
];

/// Validator for a text step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Text { max: usize },
    /// Number > 0, at most two decimals kept.
    Price,
    /// Integer >= 0.
    Stock,
    /// Number > 0.
    Weight,
}

impl Rule {
    /// Check an answer and convert it to its draft value.
    pub fn validate(&self, input: &str) -> Result<Value, ValidationError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ValidationError::Empty);
        }
        if input.starts_with('/') {
            return Err(ValidationError::CommandInWizard);
        }

        match self {
            Rule::Text { max } => {
                if input.chars().count() > *max {
                    return Err(ValidationError::TooLong { max: *max });
                }
                Ok(Value::String(input.to_string()))
            }
            Rule::Price => {
                let price = parse_decimal(input)?;
                if price <= 0.0 {
                    return Err(ValidationError::NotPositive);
                }
                number((price * 100.0).round() / 100.0)
            }
            Rule::Weight => {
                let weight = parse_decimal(input)?;
                if weight <= 0.0 {
                    return Err(ValidationError::NotPositive);
                }
                number(weight)
            }
            Rule::Stock => {
                if input.starts_with('-') {
                    return Err(ValidationError::Negative);
                }
                let stock: u64 = input.parse().map_err(|_| ValidationError::NotAnInteger)?;
                Ok(Value::Number(stock.into()))
            }
        }
    }
}

/// Accepts `12.5`, `12,5` and a trailing currency/unit word.
fn parse_decimal(input: &str) -> Result<f64, ValidationError> {
    let token = input
        .split_whitespace()
        .next()
        .unwrap_or(input)
        .trim_start_matches(['$', '€', '£'])
        .replace(',', ".");
    let value: f64 = token.parse().map_err(|_| ValidationError::NotANumber)?;
    if !value.is_finite() {
        return Err(ValidationError::NotANumber);
    }
    Ok(value)
}

fn number(value: f64) -> Result<Value, ValidationError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or(ValidationError::NotANumber)
}
