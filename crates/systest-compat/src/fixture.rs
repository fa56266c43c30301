//! Data written by the old release and the results expected back.

use crate::compare::CompareMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;

/// A named read query and its expected JSON result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCheck {
    pub name: String,
    pub query: String,
    pub expected: Value,
}

/// Schema, N-Quads and query checks for one compatibility run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityFixture {
    pub schema: String,
    pub nquads: String,
    pub checks: Vec<QueryCheck>,
    #[serde(default)]
    pub mode: CompareMode,
}

const SCHEMA: &str = "list: [string] .";

const NQUADS: &str = r#"
<0x1> <name> "abc" .
<0x1> <name> "abc_en"@en .
<0x1> <name> "abc_nl"@nl .
<0x2> <name> "abc_hi"@hi .
<0x2> <name> "abc_ci"@ci .
<0x2> <name> "abc_ja"@ja .
<0x3> <name> "abcd" .
<0x1> <number> "99"^^<xs:int> .

<0x1> <list> "first" .
<0x1> <list> "first_en"@en .
<0x1> <list> "first_it"@it .
<0x1> <list> "second" .
"#;

const EXPAND_ALL: &str = "{ q(func: uid(0x1,0x2,0x3)) { expand(_all_) } }";

impl CompatibilityFixture {
    /// Scalar, language-tagged, typed and list values on three nodes, read
    /// back with `expand(_all_)`.
    pub fn standard() -> Self {
        Self {
            schema: SCHEMA.to_string(),
            nquads: NQUADS.to_string(),
            checks: vec![QueryCheck {
                name: "expand-all".to_string(),
                query: EXPAND_ALL.to_string(),
                expected: json!({
                    "q": [
                        { "name": "abcd" },
                        {
                            "name@ci": "abc_ci",
                            "name@hi": "abc_hi",
                            "name@ja": "abc_ja"
                        },
                        {
                            "name@en": "abc_en",
                            "name@nl": "abc_nl",
                            "name": "abc",
                            "number": 99,
                            "list": ["second", "first"],
                            "list@en": "first_en",
                            "list@it": "first_it"
                        }
                    ]
                }),
            }],
            mode: CompareMode::Canonical,
        }
    }

    /// Loads a fixture from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| Error::Fixture {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Non-empty N-Quad statements, trimmed.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.nquads.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

impl Default for CompatibilityFixture {
    fn default() -> Self {
        Self::standard()
    }
}
