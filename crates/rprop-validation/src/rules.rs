#![forbid(unsafe_code)]

//! Declarative validation rules.
//!
//! A [`RuleSet`] is a list of [`Rule`]s plus an optional display name. It is
//! resolved once, when attached to a validated cell, into an ordinary
//! validator closure; no runtime type inspection is involved. Values expose
//! what the rules need through [`RuleValue`].
//!
//! Message templates use positional placeholders: `{0}` is the display name
//! (or the member name when none is set), `{1}` and `{2}` are rule
//! parameters.
//!
//! Templates and display names are either literal text or keys into a
//! resource lookup installed with [`RuleSet::resources`], typically a
//! localization table. A key the lookup cannot resolve falls back to the
//! rule's default template or the member name.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use regex::Regex;

use crate::error::RuleError;

/// What rules may ask of a value.
pub trait RuleValue {
    /// Absent or blank; fails [`Rule::required`].
    fn is_missing(&self) -> bool;

    /// Textual form, for length and pattern rules.
    fn as_text(&self) -> Option<&str> {
        None
    }

    /// Numeric form, for range rules.
    fn as_number(&self) -> Option<f64> {
        None
    }
}

impl RuleValue for str {
    fn is_missing(&self) -> bool {
        self.trim().is_empty()
    }

    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl RuleValue for String {
    fn is_missing(&self) -> bool {
        self.as_str().is_missing()
    }

    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl<T: RuleValue + ?Sized> RuleValue for &T {
    fn is_missing(&self) -> bool {
        (**self).is_missing()
    }

    fn as_text(&self) -> Option<&str> {
        (**self).as_text()
    }

    fn as_number(&self) -> Option<f64> {
        (**self).as_number()
    }
}

impl<T: RuleValue> RuleValue for Option<T> {
    fn is_missing(&self) -> bool {
        self.as_ref().is_none_or(RuleValue::is_missing)
    }

    fn as_text(&self) -> Option<&str> {
        self.as_ref().and_then(RuleValue::as_text)
    }

    fn as_number(&self) -> Option<f64> {
        self.as_ref().and_then(RuleValue::as_number)
    }
}

impl RuleValue for bool {
    fn is_missing(&self) -> bool {
        false
    }
}

macro_rules! numeric_rule_value {
    ($($ty:ty),*) => {
        $(
            impl RuleValue for $ty {
                fn is_missing(&self) -> bool {
                    false
                }

                fn as_number(&self) -> Option<f64> {
                    Some(*self as f64)
                }
            }
        )*
    };
}

numeric_rule_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

#[derive(Clone)]
enum Constraint {
    Required,
    StringLength { min: usize, max: usize },
    Range { min: f64, max: f64 },
    Pattern { source: String, anchored: Regex },
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("Required"),
            Self::StringLength { min, max } => f
                .debug_struct("StringLength")
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::Pattern { source, .. } => f.debug_tuple("Pattern").field(source).finish(),
        }
    }
}

/// Literal text, or a key resolved through the rule set's resources.
#[derive(Debug, Clone)]
enum Text {
    Literal(String),
    Key(String),
}

/// Resolves resource keys to text.
#[derive(Clone)]
struct Resources(Rc<dyn Fn(&str) -> Option<String>>);

impl Resources {
    fn resolve(resources: Option<&Self>, text: &Text) -> Option<String> {
        match text {
            Text::Literal(literal) => Some(literal.clone()),
            Text::Key(key) => {
                let found = resources.and_then(|r| (r.0)(key.as_str()));
                if found.is_none() {
                    tracing::warn!(message = "rules.resource_missing", key = key.as_str());
                }
                found
            }
        }
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resources(..)")
    }
}

/// One declarative constraint with its message template.
#[derive(Debug, Clone)]
pub struct Rule {
    constraint: Constraint,
    message: Option<Text>,
}

impl Rule {
    /// Fails on absent, empty or whitespace-only values.
    #[must_use]
    pub fn required() -> Self {
        Self::from_constraint(Constraint::Required)
    }

    /// Text longer than `max` characters fails. Absent values pass.
    #[must_use]
    pub fn max_length(max: usize) -> Self {
        Self::from_constraint(Constraint::StringLength { min: 0, max })
    }

    /// Text outside `min..=max` characters fails. Absent values pass.
    pub fn length_between(min: usize, max: usize) -> Result<Self, RuleError> {
        if min > max {
            return Err(RuleError::InvertedLength { min, max });
        }
        Ok(Self::from_constraint(Constraint::StringLength { min, max }))
    }

    /// Numbers (or numeric text) outside `min..=max` fail. Absent values pass.
    pub fn range(min: f64, max: f64) -> Result<Self, RuleError> {
        if !(min <= max) {
            return Err(RuleError::InvertedRange { min, max });
        }
        Ok(Self::from_constraint(Constraint::Range { min, max }))
    }

    /// Text that does not match `pattern` in full fails. Empty values pass.
    pub fn pattern(pattern: &str) -> Result<Self, RuleError> {
        let anchored = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self::from_constraint(Constraint::Pattern {
            source: pattern.to_string(),
            anchored,
        }))
    }

    /// Replace the default message template.
    #[must_use]
    pub fn with_message(mut self, template: impl Into<String>) -> Self {
        self.message = Some(Text::Literal(template.into()));
        self
    }

    /// Take the message template from the rule set's resources under `key`.
    #[must_use]
    pub fn with_message_key(mut self, key: impl Into<String>) -> Self {
        self.message = Some(Text::Key(key.into()));
        self
    }

    fn from_constraint(constraint: Constraint) -> Self {
        Self {
            constraint,
            message: None,
        }
    }

    fn default_template(&self) -> &'static str {
        match &self.constraint {
            Constraint::Required => "The {0} field is required.",
            Constraint::StringLength { min: 0, .. } => {
                "The field {0} must be a string with a maximum length of {1}."
            }
            Constraint::StringLength { .. } => {
                "The field {0} must be a string with a minimum length of {2} and a maximum length of {1}."
            }
            Constraint::Range { .. } => "The field {0} must be between {1} and {2}.",
            Constraint::Pattern { .. } => "The field {0} must match the regular expression '{1}'.",
        }
    }

    fn parameters(&self) -> [String; 2] {
        match &self.constraint {
            Constraint::Required => [String::new(), String::new()],
            Constraint::StringLength { min, max } => [max.to_string(), min.to_string()],
            Constraint::Range { min, max } => [min.to_string(), max.to_string()],
            Constraint::Pattern { source, .. } => [source.clone(), String::new()],
        }
    }

    /// Whether `value` satisfies the constraint.
    pub fn accepts<T: RuleValue + ?Sized>(&self, value: &T) -> bool {
        match &self.constraint {
            Constraint::Required => !value.is_missing(),
            Constraint::StringLength { min, max } => value.as_text().is_none_or(|text| {
                let len = text.chars().count();
                (*min..=*max).contains(&len)
            }),
            Constraint::Range { min, max } => {
                let number = match value.as_number() {
                    Some(n) => Some(n),
                    None => match value.as_text().map(str::trim) {
                        Some("") | None => None,
                        Some(text) => match text.parse::<f64>() {
                            Ok(n) => Some(n),
                            Err(_) => return false,
                        },
                    },
                };
                number.is_none_or(|n| (*min..=*max).contains(&n))
            }
            Constraint::Pattern { anchored, .. } => match value.as_text() {
                Some("") | None => true,
                Some(text) => anchored.is_match(text),
            },
        }
    }

    /// Error message for a failing value, with placeholders filled.
    ///
    /// A keyed template has no resources to resolve against here and falls
    /// back to the default; [`RuleSet::check`] resolves it.
    #[must_use]
    pub fn message(&self, display_name: &str) -> String {
        self.render(None, display_name)
    }

    fn template(&self, resources: Option<&Resources>) -> Cow<'static, str> {
        self.message
            .as_ref()
            .and_then(|text| Resources::resolve(resources, text))
            .map_or(Cow::Borrowed(self.default_template()), Cow::Owned)
    }

    fn render(&self, resources: Option<&Resources>, display_name: &str) -> String {
        let [first, second] = self.parameters();
        self.template(resources)
            .replace("{0}", display_name)
            .replace("{1}", &first)
            .replace("{2}", &second)
    }
}

/// Ordered rules plus the display name used in their messages.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    display_name: Option<Text>,
    resources: Option<Resources>,
    rules: Vec<Rule>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name substituted for `{0}`, overriding the member name.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(Text::Literal(name.into()));
        self
    }

    /// Take the display name from the resources under `key`.
    #[must_use]
    pub fn display_name_key(mut self, key: impl Into<String>) -> Self {
        self.display_name = Some(Text::Key(key.into()));
        self
    }

    /// Install the lookup used for keyed templates and display names.
    #[must_use]
    pub fn resources(mut self, lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.resources = Some(Resources(Rc::new(lookup)));
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Messages of every rule `value` fails, in rule order.
    pub fn check<T: RuleValue + ?Sized>(&self, member: &str, value: &T) -> Vec<String> {
        let mut failing = self.rules.iter().filter(|rule| !rule.accepts(value)).peekable();
        if failing.peek().is_none() {
            return Vec::new();
        }
        let resources = self.resources.as_ref();
        let name = self
            .display_name
            .as_ref()
            .and_then(|text| Resources::resolve(resources, text))
            .unwrap_or_else(|| member.to_string());
        failing.map(|rule| rule.render(resources, &name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_rejects_absent_and_blank() {
        let rule = Rule::required();
        assert!(!rule.accepts(&None::<String>));
        assert!(!rule.accepts(&Some(String::new())));
        assert!(!rule.accepts("   "));
        assert!(rule.accepts("a"));
        assert!(rule.accepts(&0i32));
    }

    #[test]
    fn max_length_counts_characters() {
        let rule = Rule::max_length(5).with_message("5over");
        assert!(rule.accepts(&None::<String>));
        assert!(rule.accepts("héllo"));
        assert!(!rule.accepts("aaaaaa"));
        assert_eq!(rule.message("Both"), "5over");
    }

    #[test]
    fn length_between_checks_both_ends() {
        let rule = Rule::length_between(2, 4).expect("valid bounds");
        assert!(!rule.accepts("a"));
        assert!(rule.accepts("abcd"));
        assert!(!rule.accepts("abcde"));
        assert_eq!(
            rule.message("Code"),
            "The field Code must be a string with a minimum length of 2 and a maximum length of 4."
        );
        assert!(matches!(
            Rule::length_between(3, 1),
            Err(RuleError::InvertedLength { min: 3, max: 1 })
        ));
    }

    #[test]
    fn range_accepts_numbers_and_numeric_text() {
        let rule = Rule::range(1.0, 10.0).expect("valid range");
        assert!(rule.accepts(&5u32));
        assert!(!rule.accepts(&11i64));
        assert!(rule.accepts("7.5"));
        assert!(!rule.accepts("abc"));
        assert!(rule.accepts(""));
        assert_eq!(rule.message("Count"), "The field Count must be between 1 and 10.");
        assert!(Rule::range(2.0, 1.0).is_err());
        assert!(Rule::range(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn pattern_must_match_whole_text() {
        let rule = Rule::pattern("[a-z]+").expect("valid pattern");
        assert!(rule.accepts("abc"));
        assert!(!rule.accepts("abc1"));
        assert!(rule.accepts(""));
        assert_eq!(
            rule.message("Slug"),
            "The field Slug must match the regular expression '[a-z]+'."
        );
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = Rule::pattern("(").expect_err("unbalanced group");
        assert!(err.to_string().starts_with("invalid pattern `(`"));
    }

    #[test]
    fn template_uses_member_name_without_display_name() {
        let rules = RuleSet::new()
            .rule(Rule::required().with_message("Custom validation error message for {0}"));
        assert_eq!(
            rules.check("CustomValidationErrorMessageProperty", &None::<String>),
            vec!["Custom validation error message for CustomValidationErrorMessageProperty"]
        );
    }

    #[test]
    fn template_prefers_display_name() {
        let rules = RuleSet::new()
            .display_name("CustomName")
            .rule(Rule::required().with_message("Custom validation error message for {0}"));
        assert_eq!(
            rules.check("Ignored", ""),
            vec!["Custom validation error message for CustomName"]
        );
    }

    fn resource(key: &str) -> Option<String> {
        match key {
            "ValidationErrorMessage" => Some("Oops!? {0} is required.".to_string()),
            "ValidationTargetPropertyName" => Some("FromResource".to_string()),
            _ => None,
        }
    }

    #[test]
    fn template_and_display_name_come_from_resources() {
        let rules = RuleSet::new()
            .resources(resource)
            .display_name_key("ValidationTargetPropertyName")
            .rule(Rule::required().with_message_key("ValidationErrorMessage"));
        assert_eq!(
            rules.check("CustomValidationErrorMessageWithResourceProperty", ""),
            vec!["Oops!? FromResource is required."]
        );
        assert!(rules.check("Ignored", "set").is_empty());
    }

    #[test]
    #[tracing_test::traced_test]
    fn unresolved_keys_fall_back_to_defaults() {
        let rules = RuleSet::new()
            .resources(resource)
            .display_name_key("NoSuchName")
            .rule(Rule::required().with_message_key("NoSuchMessage"));
        assert_eq!(rules.check("Title", ""), vec!["The Title field is required."]);
        assert!(logs_contain("rules.resource_missing"));

        let unresolved = Rule::required().with_message_key("ValidationErrorMessage");
        assert_eq!(unresolved.message("Title"), "The Title field is required.");
    }

    #[test]
    fn check_reports_every_failing_rule_in_order() {
        let rules = RuleSet::new()
            .rule(Rule::max_length(2))
            .rule(Rule::pattern("[0-9]*").expect("valid pattern"));
        assert_eq!(rules.check("Pin", "abc").len(), 2);
        assert!(rules.check("Pin", "12").is_empty());
    }
}
