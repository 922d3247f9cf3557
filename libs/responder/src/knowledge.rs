//! Per-tenant knowledge snippets and lightweight keyword retrieval.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantKnowledge {
    /// Handlebars template overriding the default system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub entries: Vec<KnowledgeEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
struct KnowledgeFile {
    #[serde(default)]
    tenants: BTreeMap<String, TenantKnowledge>,
}

/// Knowledge for every tenant, loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeBase {
    tenants: BTreeMap<String, TenantKnowledge>,
}

impl KnowledgeBase {
    pub fn new(tenants: BTreeMap<String, TenantKnowledge>) -> Self {
        Self { tenants }
    }

    /// Loads a YAML knowledge file. A missing path yields an empty knowledge base.
    ///
    /// ```yaml
    /// tenants:
    ///   acme:
    ///     entries:
    ///       - title: Opening hours
    ///         keywords: [hours, open]
    ///         content: We are open 9:00-18:00 on weekdays.
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "knowledge file missing; continuing without");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read knowledge file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parse knowledge file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: KnowledgeFile = serde_yaml_bw::from_str(raw)?;
        for (tenant, knowledge) in &file.tenants {
            for entry in &knowledge.entries {
                if entry.content.trim().is_empty() {
                    bail!("tenant {tenant}: entry '{}' has empty content", entry.title);
                }
            }
        }
        Ok(Self::new(file.tenants))
    }

    pub fn tenant(&self, tenant_id: &str) -> Option<&TenantKnowledge> {
        self.tenants.get(tenant_id)
    }

    /// The `top_k` best-scoring entries for `query`, best first. Entries that share no token
    /// with the query are never returned.
    pub fn search(&self, tenant_id: &str, query: &str, top_k: usize) -> Vec<&KnowledgeEntry> {
        let Some(knowledge) = self.tenants.get(tenant_id) else {
            return Vec::new();
        };
        if top_k == 0 {
            return Vec::new();
        }
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(u32, usize, &KnowledgeEntry)> = knowledge
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let score = score_entry(&query_tokens, entry);
                (score > 0).then_some((score, idx, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().take(top_k).map(|(_, _, e)| e).collect()
    }

    /// Retrieved entries formatted for the prompt; empty when nothing matched.
    pub fn context_for(&self, tenant_id: &str, query: &str, top_k: usize) -> String {
        self.search(tenant_id, query, top_k)
            .iter()
            .map(|entry| format!("### {}\n{}", entry.title, entry.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Keyword hits weigh three, title hits two, body hits one.
pub fn score_entry(query_tokens: &BTreeSet<String>, entry: &KnowledgeEntry) -> u32 {
    let keywords: BTreeSet<String> = entry
        .keywords
        .iter()
        .flat_map(|k| tokenize(k))
        .collect();
    let title = tokenize(&entry.title);
    let body = tokenize(&entry.content);
    query_tokens
        .iter()
        .map(|token| {
            let mut score = 0;
            if keywords.contains(token) {
                score += 3;
            }
            if title.contains(token) {
                score += 2;
            }
            if body.contains(token) {
                score += 1;
            }
            score
        })
        .sum()
}

/// Lowercased alphanumeric words of two or more characters, plus overlapping bigrams over runs
/// of CJK characters (single characters for runs of one).
///
/// ```
/// use csd_responder::tokenize;
///
/// let tokens = tokenize("What are your HOURS? 營業時間");
/// assert!(tokens.contains("hours"));
/// assert!(tokens.contains("營業"));
/// assert!(tokens.contains("時間"));
/// assert!(!tokens.contains("a"));
/// ```
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    let mut word = String::new();
    let mut cjk: Vec<char> = Vec::new();

    let flush_word = |word: &mut String, tokens: &mut BTreeSet<String>| {
        if word.chars().count() >= 2 {
            tokens.insert(word.to_lowercase());
        }
        word.clear();
    };
    let flush_cjk = |run: &mut Vec<char>, tokens: &mut BTreeSet<String>| {
        match run.len() {
            0 => {}
            1 => {
                tokens.insert(run[0].to_string());
            }
            _ => {
                for pair in run.windows(2) {
                    tokens.insert(pair.iter().collect());
                }
            }
        }
        run.clear();
    };

    for ch in text.chars() {
        if is_cjk(ch) {
            flush_word(&mut word, &mut tokens);
            cjk.push(ch);
        } else if ch.is_alphanumeric() {
            flush_cjk(&mut cjk, &mut tokens);
            word.push(ch);
        } else {
            flush_word(&mut word, &mut tokens);
            flush_cjk(&mut cjk, &mut tokens);
        }
    }
    flush_word(&mut word, &mut tokens);
    flush_cjk(&mut cjk, &mut tokens);
    tokens
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}')
}
