//! Restricted XPath
//!
//! Paths are absolute and module-qualified: `/mod:node/sub`. List
//! instances are addressed by key predicates `[key='value']`, leaf-list
//! entries by `[.='value']`. The only axis is child; a trailing `/*` or
//! `//*` selects the subtree below the addressed node.

use std::fmt;

use crate::core::error::{Error, Result};

/// A single predicate on a path step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `[key='value']` on a list step
    Key { name: String, value: String },
    /// `[.='value']` on a leaf-list step
    Value(String),
}

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub predicates: Vec<Predicate>,
}

impl Step {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predicates: Vec::new(),
        }
    }

    /// Key predicate value by key name, if present.
    pub fn key_value(&self, key: &str) -> Option<&str> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::Key { name, value } if name == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Leaf-list value predicate, if present.
    pub fn value_predicate(&self) -> Option<&str> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::Value(v) => Some(v.as_str()),
            _ => None,
        })
    }
}

/// A parsed absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    /// Module qualifier of the first step
    pub module: String,
    /// Steps from the module root
    pub steps: Vec<Step>,
    /// True when the path ended with `/*` or `//*`
    pub descendants: bool,
}

impl XPath {
    /// Parse the textual form.
    pub fn parse(text: &str) -> Result<XPath> {
        let mut chars = text.chars().peekable();
        if chars.next() != Some('/') {
            return Err(Error::with_xpath(
                crate::core::error::ErrorKind::InvalidArgument,
                "path must be absolute",
                text,
            ));
        }

        let bad = |msg: &str| Error::with_xpath(crate::core::error::ErrorKind::InvalidArgument, msg, text);

        let mut module = None;
        let mut steps: Vec<Step> = Vec::new();
        let mut descendants = false;

        loop {
            // one step: name, optional predicates
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '/' || c == '[' {
                    break;
                }
                name.push(c);
                chars.next();
            }

            if name == "*" {
                if chars.next().is_some() {
                    return Err(bad("'*' is only allowed as the final step"));
                }
                descendants = true;
                break;
            }

            if module.is_none() {
                let (m, rest) = name
                    .split_once(':')
                    .ok_or_else(|| bad("first step must be module-qualified"))?;
                if m.is_empty() || rest.is_empty() {
                    return Err(bad("malformed module qualifier"));
                }
                module = Some(m.to_string());
                name = rest.to_string();
            } else if let Some((m, rest)) = name.split_once(':') {
                // re-qualification inside one module is tolerated if it matches
                if Some(m) != module.as_deref() {
                    return Err(bad("cross-module steps are not supported"));
                }
                name = rest.to_string();
            }

            if name.is_empty() {
                return Err(bad("empty path step"));
            }

            let mut step = Step::named(name);
            while chars.peek() == Some(&'[') {
                chars.next();
                let mut pred_name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '=' {
                        break;
                    }
                    pred_name.push(c);
                    chars.next();
                }
                if chars.next() != Some('=') {
                    return Err(bad("predicate is missing '='"));
                }
                let quote = match chars.next() {
                    Some(q @ ('\'' | '"')) => q,
                    _ => return Err(bad("predicate value must be quoted")),
                };
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                        None => return Err(bad("unterminated predicate value")),
                    }
                }
                if chars.next() != Some(']') {
                    return Err(bad("predicate is missing ']'"));
                }
                if pred_name == "." {
                    step.predicates.push(Predicate::Value(value));
                } else if !pred_name.is_empty() {
                    step.predicates.push(Predicate::Key {
                        name: pred_name,
                        value,
                    });
                } else {
                    return Err(bad("empty predicate name"));
                }
            }
            steps.push(step);

            match chars.next() {
                None => break,
                Some('/') => {
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        if chars.next() != Some('*') || chars.next().is_some() {
                            return Err(bad("'//' must be followed by a final '*'"));
                        }
                        descendants = true;
                        break;
                    }
                    continue;
                }
                Some(_) => return Err(bad("unexpected character after predicate")),
            }
        }

        let module = module.ok_or_else(|| bad("path has no module qualifier"))?;
        if steps.is_empty() {
            return Err(bad("path has no steps"));
        }
        Ok(XPath {
            module,
            steps,
            descendants,
        })
    }

    /// Step names only, for schema resolution.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Schema path of the addressed node, predicates stripped.
    pub fn schema_path(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            if i == 0 {
                out.push_str(&format!("/{}:{}", self.module, step.name));
            } else {
                out.push('/');
                out.push_str(&step.name);
            }
        }
        out
    }

    /// Parent path, or `None` for a top-level step.
    pub fn parent(&self) -> Option<XPath> {
        if self.steps.len() <= 1 {
            return None;
        }
        Some(XPath {
            module: self.module.clone(),
            steps: self.steps[..self.steps.len() - 1].to_vec(),
            descendants: false,
        })
    }

    /// Last step of the path.
    pub fn last(&self) -> &Step {
        self.steps.last().expect("parsed path always has a step")
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i == 0 {
                write!(f, "/{}:{}", self.module, step.name)?;
            } else {
                write!(f, "/{}", step.name)?;
            }
            for pred in &step.predicates {
                match pred {
                    Predicate::Key { name, value } => write!(f, "[{}='{}']", name, value)?,
                    Predicate::Value(v) => write!(f, "[.='{}']", v)?,
                }
            }
        }
        if self.descendants {
            write!(f, "//*")?;
        }
        Ok(())
    }
}
