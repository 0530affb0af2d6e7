//! Immutable data shared by all virtual users of a run.
//!
//! The [`Dataset`] is built once during setup and then shared behind an `Arc`. It holds the
//! shuffled [`FixtureSet`] of existing records, a [`PayloadPool`] of pre-generated documents for
//! writes, and the [`KeywordSet`] used by keyword lookups. Nothing in here is mutated after
//! setup, so workers read it without locking.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::Payloads;
use crate::error::{Error, Result};
use crate::mix::Mix;

/// Characters used for random words in generated documents.
const WORD_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// The vocabulary searched by keyword lookups unless configured otherwise.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "difficult",
    "node",
    "aquarium",
    "city",
    "accident",
    "variable",
    "palace",
    "franchise",
    "whip",
    "dribble",
    "chicken",
    "switch",
    "skin",
    "genetic",
    "identity",
    "hospital",
    "college",
    "cord",
    "mechanical",
    "taxi",
];

/// A document in the target store together with the revision last seen for it.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct RecordRef {
    /// The document identifier.
    pub id: String,
    /// The revision required for conditional updates and deletes.
    pub version_token: String,
}

impl RecordRef {
    /// Creates a new reference.
    pub fn new(id: impl Into<String>, version_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version_token: version_token.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    rows: Vec<CatalogRow>,
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: String,
    value: CatalogValue,
}

#[derive(Debug, Deserialize)]
struct CatalogValue {
    rev: String,
}

/// The existing records targeted by reads, updates and deletes.
///
/// The order is randomized exactly once, when the set is loaded, and is stable for the rest of
/// the run.
#[derive(Clone, Debug, Default)]
pub struct FixtureSet {
    records: Vec<RecordRef>,
}

impl FixtureSet {
    /// Loads the catalog at `path` and shuffles it.
    pub fn load(path: &Path, rng: &mut impl Rng) -> Result<Self> {
        let file = File::open(path).map_err(|cause| Error::Catalog {
            path: path.to_owned(),
            cause,
        })?;
        let records = Self::from_reader(BufReader::new(file))?;
        Ok(Self::shuffled(records, rng))
    }

    /// Parses a document listing in the shape of a CouchDB `_all_docs` response.
    ///
    /// The records are returned in catalog order. An empty listing is an error, since a run
    /// cannot target records that do not exist.
    pub fn from_reader(reader: impl Read) -> Result<Vec<RecordRef>> {
        let catalog: Catalog = serde_json::from_reader(reader)?;
        if catalog.rows.is_empty() {
            return Err(Error::EmptyCatalog);
        }

        Ok(catalog
            .rows
            .into_iter()
            .map(|row| RecordRef {
                id: row.id,
                version_token: row.value.rev,
            })
            .collect())
    }

    /// Creates a fixture set from `records` in a uniformly random order.
    pub fn shuffled(mut records: Vec<RecordRef>, rng: &mut impl Rng) -> Self {
        records.shuffle(rng);
        Self { records }
    }

    /// Creates a fixture set that keeps the given order.
    pub fn from_ordered(records: Vec<RecordRef>) -> Self {
        Self { records }
    }

    /// Returns the record at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&RecordRef> {
        self.records.get(index)
    }

    /// The records in run order.
    pub fn as_slice(&self) -> &[RecordRef] {
        &self.records
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Word counts for the generated article text.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct WordRange {
    /// Minimum number of words, inclusive.
    pub min: usize,
    /// Maximum number of words, inclusive.
    pub max: usize,
}

impl WordRange {
    fn sample(self, rng: &mut impl Rng) -> usize {
        if self.max <= self.min {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

impl Default for WordRange {
    fn default() -> Self {
        Self { min: 500, max: 2000 }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    title: String,
    keywords: Vec<String>,
    article_id: u32,
    versions: Vec<ArticleVersion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArticleVersion {
    id: String,
    time_stamp: String,
    contributors: Vec<Contributor>,
    comment: String,
    model: &'static str,
    format: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct Contributor {
    id: String,
    username: String,
}

fn random_word(rng: &mut impl Rng, out: &mut String) {
    let len = rng.random_range(5..=10);
    for _ in 0..len {
        let idx = rng.random_range(0..WORD_CHARSET.len());
        out.push(WORD_CHARSET[idx] as char);
    }
}

fn random_words(rng: &mut impl Rng, count: usize) -> String {
    let mut text = String::with_capacity(count * 8);
    for i in 0..count {
        if i > 0 {
            text.push(' ');
        }
        random_word(rng, &mut text);
    }
    text
}

fn generate_article(text_words: WordRange, rng: &mut impl Rng) -> Article {
    let title_words = rng.random_range(5..=20);
    let title = random_words(rng, title_words);
    let keywords = title.split(' ').map(str::to_owned).collect();
    let timestamp = humantime::format_rfc3339_millis(SystemTime::now()).to_string();
    let comment_words = rng.random_range(1..=30);
    let comment = random_words(rng, comment_words);
    let text_words = text_words.sample(rng);
    let text = random_words(rng, text_words);

    Article {
        title,
        keywords,
        article_id: rng.random_range(0..10_000),
        versions: vec![ArticleVersion {
            id: rng.random_range(0..1_000_000u32).to_string(),
            time_stamp: timestamp,
            contributors: vec![Contributor {
                id: rng.random_range(0..10_000u32).to_string(),
                username: random_words(rng, 2),
            }],
            comment,
            model: "wikitext",
            format: "text/x-wiki",
            text,
        }],
    }
}

/// Pre-generated JSON documents sampled by create and update iterations.
#[derive(Clone, Debug, Default)]
pub struct PayloadPool {
    payloads: Vec<Bytes>,
}

impl PayloadPool {
    /// Generates `size` random article documents.
    pub fn generate(size: usize, text_words: WordRange, rng: &mut impl Rng) -> Self {
        let payloads = (0..size)
            .map(|_| {
                let article = generate_article(text_words, rng);
                // Serializing a struct of strings and integers cannot fail.
                Bytes::from(serde_json::to_vec(&article).unwrap_or_default())
            })
            .collect();

        Self { payloads }
    }

    /// Creates a pool from existing payloads.
    pub fn from_payloads(payloads: Vec<Bytes>) -> Self {
        Self { payloads }
    }

    /// Picks a payload uniformly at random, independent of previous picks.
    pub fn sample(&self, rng: &mut impl Rng) -> Option<Bytes> {
        self.payloads.choose(rng).cloned()
    }

    /// The number of payloads.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Returns `true` if the pool holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Total size of all payloads in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.payloads.iter().map(|p| p.len() as u64).sum()
    }
}

/// The vocabulary for keyword lookups.
#[derive(Clone, Debug)]
pub struct KeywordSet {
    words: Vec<String>,
}

impl KeywordSet {
    /// Creates a keyword set from the given words.
    pub fn new(words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    /// Picks a keyword uniformly at random.
    pub fn sample(&self, rng: &mut impl Rng) -> Option<&str> {
        self.words.choose(rng).map(String::as_str)
    }

    /// The number of keywords.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns `true` if there are no keywords.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for KeywordSet {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().copied())
    }
}

/// All read-only data of a run.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    /// Existing records, in run order.
    pub fixtures: FixtureSet,
    /// Documents for create and update requests.
    pub payloads: PayloadPool,
    /// Words for keyword lookups.
    pub keywords: KeywordSet,
}

impl Dataset {
    /// Builds everything the given mix needs.
    ///
    /// The catalog is only read if the mix targets existing records, payloads are only generated
    /// for mixes that write, and the keyword set must be non-empty for keyword lookups.
    pub fn prepare(
        mix: &Mix,
        catalog: &Path,
        payloads: &Payloads,
        keywords: &[String],
    ) -> Result<Self> {
        let mut rng = SmallRng::seed_from_u64(rand::random());

        let keywords = KeywordSet::new(keywords.iter().cloned());
        if mix.needs_keywords() && keywords.is_empty() {
            return Err(Error::EmptyKeywords);
        }

        let fixtures = if mix.needs_targets() {
            FixtureSet::load(catalog, &mut rng)?
        } else {
            FixtureSet::default()
        };

        let payloads = if mix.needs_payloads() {
            if payloads.pool_size == 0 {
                return Err(Error::EmptyPool);
            }
            PayloadPool::generate(payloads.pool_size, payloads.text_words, &mut rng)
        } else {
            PayloadPool::default()
        };

        Ok(Self {
            fixtures,
            payloads,
            keywords,
        })
    }
}
