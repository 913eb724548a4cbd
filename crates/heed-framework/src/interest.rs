//! Interest: the condition model that decides which events a handler cares about.
//!
//! An [`Interest`] holds literal conditions grouped by [`MatchMode`] plus any
//! number of nested interests. Each condition may carry an [`Action`], either
//! a named callback or a static reply template.
//!
//! In the default mode any satisfied condition makes the interest match and
//! its own action is the one to run. With `match_all` every non-empty category
//! must be satisfied and the single interest-level action runs instead.
//!
//! # Example
//!
//! ```rust
//! use heed_core::GroupMessage;
//! use heed_framework::{Interest, MatchMode};
//!
//! let interest = Interest::builder()
//!     .on_callback(MatchMode::Prefix, "你", "m3")
//!     .on_callback(MatchMode::Suffix, "我", "m1")
//!     .build()
//!     .unwrap();
//!
//! let event = GroupMessage::new("g", "u", "你好吗");
//! let resolved = interest.resolve(&event).unwrap();
//! assert_eq!(resolved.action.map(|a| a.name()), Some("m3"));
//! assert!(!interest.is_interest(&GroupMessage::new("g", "u", "随便说说")));
//! ```
//!
//! # Iteration order
//!
//! When several conditions could match the same event in the default mode, which
//! one is reported is unspecified. Callers must not rely on registration order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;
use serde::{Deserialize, Serialize};

use heed_core::Event;

use crate::error::InterestError;

/// Maximum nesting depth of an interest tree, counting the root.
pub const MAX_DEPTH: usize = 16;

// ============================================================================
// Match modes and actions
// ============================================================================

/// How a literal condition is compared against an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The plain text contains the condition.
    Contains,
    /// The plain text equals the condition.
    Equals,
    /// The plain text starts with the condition.
    Prefix,
    /// The plain text ends with the condition.
    Suffix,
    /// The whole plain text matches the condition as a regular expression.
    Regex,
    /// The sender id equals the condition.
    Sender,
    /// The group id equals the condition.
    Group,
}

impl MatchMode {
    /// Every mode, in evaluation order.
    pub const ALL: [MatchMode; 7] = [
        Self::Contains,
        Self::Equals,
        Self::Prefix,
        Self::Suffix,
        Self::Regex,
        Self::Sender,
        Self::Group,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contains => "contains",
            Self::Equals => "equals",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Regex => "regex",
            Self::Sender => "sender",
            Self::Group => "group",
        })
    }
}

/// What to do when a condition matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Action {
    /// Run the callback registered under this name.
    Callback(String),
    /// Render this template and reply with it.
    Output(String),
}

impl Action {
    /// Creates a callback action.
    pub fn callback(name: impl Into<String>) -> Self {
        Self::Callback(name.into())
    }

    /// Creates a static output action.
    pub fn output(template: impl Into<String>) -> Self {
        Self::Output(template.into())
    }

    /// Returns the callback name or the template text.
    pub fn name(&self) -> &str {
        match self {
            Self::Callback(name) | Self::Output(name) => name,
        }
    }

    /// Returns true for callback actions.
    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Callback(_))
    }
}

// ============================================================================
// Declarative filters
// ============================================================================

/// A declarative description of one condition, as found in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestFilter {
    /// How to compare.
    pub mode: MatchMode,
    /// What to compare against.
    pub condition: String,
    /// Callback to run on match. Takes precedence over `output`.
    #[serde(default)]
    pub callback: Option<String>,
    /// Template to reply with on match.
    #[serde(default)]
    pub output: Option<String>,
}

impl InterestFilter {
    fn action(&self) -> Option<Action> {
        match (&self.callback, &self.output) {
            (Some(name), _) if !name.is_empty() => Some(Action::callback(name)),
            (_, Some(template)) if !template.is_empty() => Some(Action::output(template)),
            _ => None,
        }
    }
}

// ============================================================================
// Interest
// ============================================================================

/// A rule set over a single event.
///
/// Equality and hashing are structural over the conditions, actions and the
/// `match_all` flag, so equal interests can be used as correlation keys.
#[derive(Clone, Default)]
pub struct Interest {
    literals: [BTreeMap<String, Option<Action>>; 7],
    nested: Vec<(Interest, Option<Action>)>,
    match_all: bool,
    match_all_action: Option<Action>,
    patterns: HashMap<String, Regex>,
}

/// Which part of an interest matched.
#[derive(Debug, Clone, Copy)]
pub enum Matched<'a> {
    /// A literal condition in one category.
    Literal {
        /// The category.
        mode: MatchMode,
        /// The condition text.
        condition: &'a str,
    },
    /// A nested interest.
    Nested(&'a Interest),
    /// The interest as a whole, in `match_all` mode.
    Whole(&'a Interest),
}

/// The outcome of resolving an interest against an event.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    /// What matched.
    pub matched: Matched<'a>,
    /// The action bound to it, if any.
    pub action: Option<&'a Action>,
}

impl Resolution<'_> {
    /// Returns the match mode for literal matches.
    pub fn mode(&self) -> Option<MatchMode> {
        match self.matched {
            Matched::Literal { mode, .. } => Some(mode),
            _ => None,
        }
    }
}

/// The parts of an event the matcher looks at.
struct Subject<'e> {
    text: String,
    sender: Option<&'e str>,
    group: Option<&'e str>,
}

impl<'e> Subject<'e> {
    fn of(event: &'e dyn Event) -> Option<Self> {
        Some(Self {
            text: event.plain_text()?,
            sender: event.sender_id(),
            group: event.group_id(),
        })
    }
}

impl Interest {
    /// Starts building an interest.
    pub fn builder() -> InterestBuilder {
        InterestBuilder::default()
    }

    /// Builds an interest from declarative filters.
    pub fn from_filters<'f>(
        filters: impl IntoIterator<Item = &'f InterestFilter>,
        match_all: bool,
    ) -> Result<Self, InterestError> {
        filters
            .into_iter()
            .fold(Self::builder().match_all(match_all), |builder, filter| {
                builder.filter(filter)
            })
            .build()
    }

    /// Returns true if every condition must hold.
    pub fn is_match_all(&self) -> bool {
        self.match_all
    }

    /// Returns the action bound to the interest as a whole.
    pub fn match_all_action(&self) -> Option<&Action> {
        self.match_all_action.as_ref()
    }

    /// Returns the literal conditions registered under `mode`.
    pub fn conditions(&self, mode: MatchMode) -> impl Iterator<Item = (&str, Option<&Action>)> {
        self.literals[mode.index()]
            .iter()
            .map(|(condition, action)| (condition.as_str(), action.as_ref()))
    }

    /// Returns the nested interests.
    pub fn nested(&self) -> impl Iterator<Item = (&Interest, Option<&Action>)> {
        self.nested
            .iter()
            .map(|(interest, action)| (interest, action.as_ref()))
    }

    /// Returns true if no condition is registered at all.
    pub fn is_empty(&self) -> bool {
        self.nested.is_empty() && self.literals.iter().all(BTreeMap::is_empty)
    }

    /// Returns true if any individual condition has an action bound.
    pub fn has_condition_actions(&self) -> bool {
        self.literals
            .iter()
            .flat_map(BTreeMap::values)
            .chain(self.nested.iter().map(|(_, action)| action))
            .any(Option::is_some)
    }

    /// Depth of the interest tree, counting this interest.
    pub fn depth(&self) -> usize {
        1 + self
            .nested
            .iter()
            .map(|(interest, _)| interest.depth())
            .max()
            .unwrap_or(0)
    }

    /// Returns true if `event` satisfies this interest.
    pub fn is_interest(&self, event: &dyn Event) -> bool {
        self.is_interest_with(event, self.match_all)
    }

    /// Returns true if `event` satisfies this interest, overriding `match_all`.
    pub fn is_interest_with(&self, event: &dyn Event, match_all: bool) -> bool {
        self.resolve_with(event, match_all).is_some()
    }

    /// Resolves which condition matched `event` and the action bound to it.
    pub fn resolve(&self, event: &dyn Event) -> Option<Resolution<'_>> {
        self.resolve_with(event, self.match_all)
    }

    /// Like [`resolve`](Self::resolve), overriding `match_all`.
    ///
    /// Returns `None` when nothing matched. A `Some` with no action means the
    /// event is interesting but nothing is bound to run.
    pub fn resolve_with(&self, event: &dyn Event, match_all: bool) -> Option<Resolution<'_>> {
        let subject = Subject::of(event)?;
        self.evaluate(&subject, match_all)
    }

    fn evaluate(&self, subject: &Subject<'_>, match_all: bool) -> Option<Resolution<'_>> {
        let mut fallback = None;

        for mode in MatchMode::ALL {
            let conditions = &self.literals[mode.index()];
            if conditions.is_empty() {
                continue;
            }
            let hits = conditions
                .iter()
                .filter(|(condition, _)| self.test(mode, condition, subject))
                .map(|(condition, action)| Resolution {
                    matched: Matched::Literal {
                        mode,
                        condition: condition.as_str(),
                    },
                    action: action.as_ref(),
                });
            match Self::pick(hits) {
                Some(hit) if !match_all && hit.action.is_some() => return Some(hit),
                Some(hit) => {
                    fallback.get_or_insert(hit);
                }
                None if match_all => return None,
                None => {}
            }
        }

        if !self.nested.is_empty() {
            let hits = self
                .nested
                .iter()
                .filter(|(interest, _)| interest.evaluate(subject, interest.match_all).is_some())
                .map(|(interest, action)| Resolution {
                    matched: Matched::Nested(interest),
                    action: action.as_ref(),
                });
            match Self::pick(hits) {
                Some(hit) if !match_all && hit.action.is_some() => return Some(hit),
                Some(hit) => {
                    fallback.get_or_insert(hit);
                }
                None if match_all => return None,
                None => {}
            }
        }

        if match_all {
            return Some(Resolution {
                matched: Matched::Whole(self),
                action: self.match_all_action.as_ref(),
            });
        }
        fallback
    }

    /// Prefers a satisfied condition that has an action bound.
    fn pick<'a>(mut hits: impl Iterator<Item = Resolution<'a>>) -> Option<Resolution<'a>> {
        let first = hits.next()?;
        if first.action.is_some() {
            return Some(first);
        }
        Some(hits.find(|hit| hit.action.is_some()).unwrap_or(first))
    }

    fn test(&self, mode: MatchMode, condition: &str, subject: &Subject<'_>) -> bool {
        match mode {
            MatchMode::Contains => subject.text.contains(condition),
            MatchMode::Equals => subject.text == condition,
            MatchMode::Prefix => subject.text.starts_with(condition),
            MatchMode::Suffix => subject.text.ends_with(condition),
            MatchMode::Regex => self
                .patterns
                .get(condition)
                .is_some_and(|re| re.is_match(&subject.text)),
            MatchMode::Sender => subject.sender == Some(condition),
            MatchMode::Group => subject.group == Some(condition),
        }
    }
}

impl PartialEq for Interest {
    fn eq(&self, other: &Self) -> bool {
        self.match_all == other.match_all
            && self.match_all_action == other.match_all_action
            && self.literals == other.literals
            && self.nested == other.nested
    }
}

impl Eq for Interest {}

impl Hash for Interest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.match_all.hash(state);
        self.match_all_action.hash(state);
        self.literals.hash(state);
        self.nested.hash(state);
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Interest");
        s.field("match_all", &self.match_all);
        if let Some(action) = &self.match_all_action {
            s.field("match_all_action", action);
        }
        for mode in MatchMode::ALL {
            let conditions = &self.literals[mode.index()];
            if !conditions.is_empty() {
                s.field(mode_field(mode), conditions);
            }
        }
        if !self.nested.is_empty() {
            s.field("nested", &self.nested);
        }
        s.finish()
    }
}

fn mode_field(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Contains => "contains",
        MatchMode::Equals => "equals",
        MatchMode::Prefix => "prefix",
        MatchMode::Suffix => "suffix",
        MatchMode::Regex => "regex",
        MatchMode::Sender => "sender",
        MatchMode::Group => "group",
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent builder for [`Interest`].
///
/// Registering the same condition twice in one mode keeps only the last action.
#[derive(Debug, Default)]
#[must_use = "call `build` to obtain the interest"]
pub struct InterestBuilder {
    interest: Interest,
    error: Option<InterestError>,
}

impl InterestBuilder {
    /// Adds a condition with no action.
    pub fn on(self, mode: MatchMode, condition: impl Into<String>) -> Self {
        self.on_action(mode, condition, None)
    }

    /// Adds a condition that runs the named callback.
    pub fn on_callback(
        self,
        mode: MatchMode,
        condition: impl Into<String>,
        callback: impl Into<String>,
    ) -> Self {
        self.on_action(mode, condition, Some(Action::callback(callback)))
    }

    /// Adds a condition that replies with a rendered template.
    pub fn on_output(
        self,
        mode: MatchMode,
        condition: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.on_action(mode, condition, Some(Action::output(template)))
    }

    /// Adds a condition with an optional action.
    pub fn on_action(
        mut self,
        mode: MatchMode,
        condition: impl Into<String>,
        action: Option<Action>,
    ) -> Self {
        let condition = condition.into();
        if mode == MatchMode::Regex && !self.interest.patterns.contains_key(&condition) {
            match Regex::new(&format!("^(?:{condition})$")) {
                Ok(re) => {
                    self.interest.patterns.insert(condition.clone(), re);
                }
                Err(e) => {
                    self.error.get_or_insert(InterestError::InvalidPattern {
                        pattern: condition,
                        reason: e.to_string(),
                    });
                    return self;
                }
            }
        }
        self.interest.literals[mode.index()].insert(condition, action);
        self
    }

    /// Adds a declarative filter.
    pub fn filter(self, filter: &InterestFilter) -> Self {
        self.on_action(filter.mode, filter.condition.clone(), filter.action())
    }

    /// Adds a nested interest with no action.
    pub fn on_interest(self, interest: Interest) -> Self {
        self.on_interest_action(interest, None)
    }

    /// Adds a nested interest that runs the named callback.
    pub fn on_interest_callback(self, interest: Interest, callback: impl Into<String>) -> Self {
        self.on_interest_action(interest, Some(Action::callback(callback)))
    }

    /// Adds a nested interest that replies with a rendered template.
    pub fn on_interest_output(self, interest: Interest, template: impl Into<String>) -> Self {
        self.on_interest_action(interest, Some(Action::output(template)))
    }

    /// Adds a nested interest with an optional action.
    pub fn on_interest_action(mut self, interest: Interest, action: Option<Action>) -> Self {
        match self
            .interest
            .nested
            .iter_mut()
            .find(|(existing, _)| *existing == interest)
        {
            Some(entry) => entry.1 = action,
            None => self.interest.nested.push((interest, action)),
        }
        self
    }

    /// Requires every non-empty category to be satisfied.
    pub fn match_all(mut self, match_all: bool) -> Self {
        self.interest.match_all = match_all;
        self
    }

    /// Requires every category and binds an action to the interest as a whole.
    pub fn match_all_with(mut self, action: Action) -> Self {
        self.interest.match_all = true;
        self.interest.match_all_action = Some(action);
        self
    }

    /// Finishes the interest.
    ///
    /// Fails if a regex condition did not compile or the tree is deeper than
    /// [`MAX_DEPTH`].
    pub fn build(self) -> Result<Interest, InterestError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let depth = self.interest.depth();
        if depth > MAX_DEPTH {
            return Err(InterestError::TooDeep {
                depth,
                limit: MAX_DEPTH,
            });
        }
        Ok(self.interest)
    }
}
