use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

/// The source text of an expression, handed as-is to the [`Evaluate`] implementation.
///
/// [`Evaluate`]: crate::Evaluate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression(String);

impl Expression {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn source(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Expression {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for Expression {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

/// A statement line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatementError {
    #[error("`{0}` is not a valid statement: expected `<keyword> <name> = <expression>`")]
    MissingAssignment(String),
    #[error("`{name}` is not a valid name in `{line}`")]
    InvalidName { line: String, name: String },
    #[error("the statement `{0}` has no expression after `=`")]
    EmptyExpression(String),
}

/// One executable line of a scenario or of the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `def <name> = <expression>`: bind the value of the expression in the context.
    Def { name: String, expression: Expression },
    /// `configure <option> = <expression>`: feature-level configuration, background only.
    Configure { option: String, expression: Expression },
    /// Any other line: evaluated for its side effects on the context.
    Eval(Expression),
}

impl Statement {
    /// Parse a statement line. A leading `* ` (step marker) is ignored.
    ///
    /// ```rust
    /// use scenario_mock::{Expression, Statement};
    ///
    /// assert_eq!(
    ///     Statement::parse("def response = #{ success: true }").unwrap(),
    ///     Statement::Def {
    ///         name: "response".into(),
    ///         expression: Expression::new("#{ success: true }")
    ///     }
    /// );
    /// assert_eq!(
    ///     Statement::parse("* print(requestPath)").unwrap(),
    ///     Statement::Eval(Expression::new("print(requestPath)"))
    /// );
    /// ```
    pub fn parse(line: &str) -> Result<Self, StatementError> {
        let line = line.trim();
        let line = line.strip_prefix("* ").map(str::trim_start).unwrap_or(line);

        if let Some(rest) = strip_keyword(line, "def") {
            let (name, expression) = split_assignment(line, rest)?;
            Ok(Statement::Def { name, expression })
        } else if let Some(rest) = strip_keyword(line, "configure") {
            let (option, expression) = split_assignment(line, rest)?;
            Ok(Statement::Configure { option, expression })
        } else {
            Ok(Statement::Eval(Expression::new(line)))
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Def { name, expression } => write!(f, "def {} = {}", name, expression),
            Statement::Configure { option, expression } => {
                write!(f, "configure {} = {}", option, expression)
            }
            Statement::Eval(expression) => write!(f, "{}", expression),
        }
    }
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn split_assignment(line: &str, rest: &str) -> Result<(String, Expression), StatementError> {
    let (name, expression) = rest
        .split_once('=')
        .ok_or_else(|| StatementError::MissingAssignment(line.to_string()))?;
    let name = name.trim();
    if !IDENTIFIER.is_match(name) {
        return Err(StatementError::InvalidName {
            line: line.to_string(),
            name: name.to_string(),
        });
    }
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(StatementError::EmptyExpression(line.to_string()));
    }
    Ok((name.to_string(), Expression::new(expression)))
}

/// A predicate paired with the statements computing the response when it matches.
///
/// Scenarios are immutable once their [`FeatureDefinition`] has been built.
///
/// [`FeatureDefinition`]: crate::FeatureDefinition
#[derive(Debug, Clone)]
pub struct Scenario {
    pub(crate) name: Option<String>,
    pub(crate) index: usize,
    pub(crate) predicate: Expression,
    pub(crate) statements: Vec<Statement>,
}

impl Scenario {
    /// Start building a scenario matching requests for which `predicate` evaluates to `true`.
    ///
    /// ```rust
    /// use scenario_mock::Scenario;
    ///
    /// let scenario = Scenario::given(r#"pathMatches("/users/{id}") && methodIs("get")"#)
    ///     .then(r#"def response = #{ id: id }"#)
    ///     .then("def responseStatus = 200")
    ///     .named("get user");
    /// ```
    pub fn given(predicate: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            name: None,
            predicate: predicate.into(),
            lines: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The position of this scenario in its feature, starting from `0`.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn predicate(&self) -> &Expression {
        &self.predicate
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Scenario #{} ({})", self.index, name),
            None => write!(f, "Scenario #{}", self.index),
        }
    }
}

/// A scenario whose statement lines have not been parsed yet.
/// Parsing happens in [`FeatureBuilder::build`](crate::FeatureBuilder::build).
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    pub(crate) name: Option<String>,
    pub(crate) predicate: String,
    pub(crate) lines: Vec<String>,
}

impl ScenarioBuilder {
    /// Append a statement line.
    pub fn then(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Assign a name to the scenario, used in logs and error messages.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
