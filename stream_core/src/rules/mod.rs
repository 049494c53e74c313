use bytes::Bytes;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SetupError};

/// One auxiliary condition of a rule, beyond its byte pattern.
///
/// A closed tagged set evaluated by `match`; adding a kind means adding a
/// variant here and an arm in [`Predicate::matches`], nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    SourcePort(u16),
    DestPort(u16),
    UriContains(Vec<u8>),
}

impl Predicate {
    pub fn matches(&self, ctx: &PacketContext) -> bool {
        match self {
            Predicate::SourcePort(port) => ctx.src_port == *port,
            Predicate::DestPort(port) => ctx.dst_port == *port,
            Predicate::UriContains(needle) => match ctx.uri.as_ref() {
                Some(uri) => contains(uri, needle),
                None => false,
            },
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Per-segment fields the upstream parser pre-extracts for predicate
/// evaluation. The matcher never sees these; only the deduper does.
#[derive(Debug, Clone, Default)]
pub struct PacketContext {
    pub src_port: u16,
    pub dst_port: u16,
    pub uri: Option<Bytes>,
    pub is_request: bool,
}

/// A single detection rule. Rules are immutable once the set is built;
/// the rule id is its index in the [`RuleSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: Vec<u8>,
    pub message: String,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}

impl Rule {
    pub fn new(pattern: impl Into<Vec<u8>>, message: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            message: message.into(),
            predicates: Vec::new(),
        }
    }

    pub fn with_predicates(mut self, predicates: Vec<Predicate>) -> Self {
        self.predicates = predicates;
        self
    }
}

/// The immutable rule table, sized at setup and shared read-only across
/// all flows and shards.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

/// JSON shape for external rule specs: pattern and URI needle as strings.
#[derive(Debug, Deserialize)]
struct RuleSpec {
    pattern: String,
    msg: String,
    #[serde(default)]
    srcport: u16,
    #[serde(default)]
    dstport: u16,
    #[serde(default)]
    uri: Option<String>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>, max_rules: usize) -> Result<Self> {
        if rules.len() > max_rules {
            return Err(SetupError::TooManyRules {
                count: rules.len(),
                max: max_rules,
            });
        }
        for (index, rule) in rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(SetupError::EmptyPattern { index });
            }
        }
        info!("rule table built: {} rules", rules.len());
        Ok(Self { rules })
    }

    /// Deserializes already-structured rule specs. Port 0 means wildcard,
    /// so zero ports simply contribute no predicate.
    pub fn from_json(json: &str, max_rules: usize) -> Result<Self> {
        let specs: Vec<RuleSpec> = serde_json::from_str(json)?;
        let rules = specs
            .into_iter()
            .map(|spec| {
                let mut predicates = Vec::new();
                if spec.srcport != 0 {
                    predicates.push(Predicate::SourcePort(spec.srcport));
                }
                if spec.dstport != 0 {
                    predicates.push(Predicate::DestPort(spec.dstport));
                }
                if let Some(uri) = spec.uri {
                    predicates.push(Predicate::UriContains(uri.into_bytes()));
                }
                Rule::new(spec.pattern.into_bytes(), spec.msg).with_predicates(predicates)
            })
            .collect();
        Self::new(rules, max_rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &[u8]> {
        self.rules.iter().map(|r| r.pattern.as_slice())
    }
}
