use sha2::{Digest, Sha256};

/// Deterministic digest identifying a conversation's message history.
///
/// Computed from the system prompt plus the ordered (role, content) pairs of
/// the non-system messages. Equal histories produce equal fingerprints; any
/// change in content, order or role produces a different one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationFingerprint(String);

impl ConversationFingerprint {
    pub fn compute<'a, I>(system_prompt: &str, turns: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hasher = Sha256::new();
        hasher.update(short_digest(system_prompt));
        for (role, content) in turns {
            hasher.update(b"\n");
            hasher.update(turn_component(role, content));
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-turn component: `sha256(role)[..16] ":" sha256(content)[..16]`.
///
/// The role is digested like the content: roles arrive verbatim from the
/// client, and a raw role could otherwise embed the `\n` component separator
/// and make two distinct histories encode identically.
fn turn_component(role: &str, content: &str) -> String {
    format!("{}:{}", short_digest(role), short_digest(content))
}

fn short_digest(text: &str) -> String {
    let hex = format!("{:x}", Sha256::digest(text.as_bytes()));
    hex[..16].to_string()
}
