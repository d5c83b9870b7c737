//! BM25 full-text index over the catalog, stored in sled trees.

use crate::error::{Error, Result};
use crate::model::{Movie, MovieId};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::convert::TryInto;
use unic_ucd_category::GeneralCategory;

pub fn tokens_iter(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c| !is_token_character(c))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

pub fn is_token_character(c: char) -> bool {
    let category = GeneralCategory::of(c);
    category.is_number() || category.is_letter() || category == GeneralCategory::PrivateUse
}

const SEARCH_FREQUENCY: &[u8] = b"search_frequency";
const SEARCH_TOKENS: &[u8] = b"search_tokens";
const SEARCH_DOCLEN: &[u8] = b"search_doclen";

// Token entry counting documents; doclen entry holding the summed length.
const ALL_DOCUMENTS: &str = "";
const TOTAL_LENGTH: &[u8] = b"";

const K1: f32 = 1.2;
const B: f32 = 0.75;

fn read_u32(bytes: &[u8]) -> Result<u32> {
    bytes
        .try_into()
        .map(u32::from_le_bytes)
        .map_err(|_| Error::Unsupported("malformed search index entry".to_owned()))
}

fn document_key(id: MovieId) -> [u8; 4] {
    id.to_be_bytes()
}

fn count_tokens(text: &str) -> (HashMap<String, u32>, u32) {
    let mut token_counts: HashMap<String, u32> = HashMap::new();
    let mut total_count = 0u32;
    for token in tokens_iter(text) {
        *token_counts.entry(token).or_insert(0) += 1;
        total_count += 1;
    }
    (token_counts, total_count)
}

/// Frequency keys are the 8 byte token id followed by the document key,
/// token entries hold the document frequency followed by the token id.
#[derive(Clone)]
pub struct SearchIndex {
    frequency: sled::Tree,
    tokens: sled::Tree,
    doclen: sled::Tree,
}

impl SearchIndex {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(SearchIndex {
            frequency: db.open_tree(SEARCH_FREQUENCY)?,
            tokens: db.open_tree(SEARCH_TOKENS)?,
            doclen: db.open_tree(SEARCH_DOCLEN)?,
        })
    }

    /// Indexes every movie not indexed yet and returns how many were added.
    pub fn index_catalog(&self, movies: &[Movie]) -> Result<usize> {
        let mut added = 0;
        for movie in movies {
            let text = format!("{} {} {}", movie.title, movie.category, movie.description);
            if self.insert(movie.id, &text)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Returns `false` if the movie is already indexed.
    pub fn insert(&self, id: MovieId, text: &str) -> Result<bool> {
        let key = document_key(id);
        if self.doclen.contains_key(key)? {
            return Ok(false);
        }
        let (mut token_counts, total_count) = count_tokens(text);
        token_counts.insert(ALL_DOCUMENTS.to_owned(), 1);
        (&self.frequency, &self.tokens, &self.doclen)
            .transaction(|(frequency, tokens, doclen)| {
                if doclen.insert(&key[..], &total_count.to_le_bytes()[..])?.is_some() {
                    return Err(ConflictableTransactionError::Abort(Error::Unsupported(
                        format!("movie {} is already indexed", id),
                    )));
                }
                let old_total = match doclen.get(TOTAL_LENGTH)? {
                    Some(total) => read_u32(&total).map_err(ConflictableTransactionError::Abort)?,
                    None => 0,
                };
                doclen.insert(TOTAL_LENGTH, &(old_total + total_count).to_le_bytes()[..])?;
                for (token, count) in token_counts.iter() {
                    let (token_id, documents) = match tokens.get(token.as_bytes())? {
                        Some(old) if old.len() == 12 => {
                            let documents =
                                read_u32(&old[0..4]).map_err(ConflictableTransactionError::Abort)?;
                            let mut token_id = [0u8; 8];
                            token_id.copy_from_slice(&old[4..12]);
                            (token_id, documents)
                        }
                        Some(_) => {
                            return Err(ConflictableTransactionError::Abort(Error::Unsupported(
                                format!("malformed token entry for {:?}", token),
                            )))
                        }
                        None => (tokens.generate_id()?.to_le_bytes(), 0),
                    };
                    let mut frequency_key = token_id.to_vec();
                    frequency_key.extend_from_slice(&key);
                    frequency.insert(frequency_key, &count.to_le_bytes()[..])?;
                    let mut entry = (documents + 1).to_le_bytes().to_vec();
                    entry.extend_from_slice(&token_id);
                    tokens.insert(token.as_bytes(), entry)?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<Error>| match e {
                TransactionError::Storage(s) => Error::from(s),
                TransactionError::Abort(e) => e,
            })?;
        Ok(true)
    }

    /// Scores every movie matching at least one token of `query`, best first.
    pub fn query(&self, query: &str) -> Result<Vec<(MovieId, f32)>> {
        let (token_counts, _) = count_tokens(query);

        let num_documents = match self.tokens.get(ALL_DOCUMENTS)? {
            Some(data) if data.len() >= 4 => read_u32(&data[0..4])?,
            _ => 0,
        };
        if num_documents == 0 {
            return Ok(Vec::new());
        }
        let total_dl = match self.doclen.get(TOTAL_LENGTH)? {
            Some(total) => read_u32(&total)?,
            None => 0,
        };
        let avgdl = (total_dl as f32 / num_documents as f32).max(1.0);

        let mut scores: HashMap<MovieId, f32> = HashMap::new();
        for (token, count) in token_counts {
            let token_data = match self.tokens.get(token.as_bytes())? {
                Some(data) if data.len() == 12 => data,
                _ => continue,
            };
            let documents = read_u32(&token_data[0..4])? as f32;
            let idf = ((num_documents as f32 - documents + 0.5) / (documents + 0.5) + 1.0).ln();
            for item in self.frequency.scan_prefix(&token_data[4..12]) {
                let (token_and_key, frequency_data) = item?;
                let key = &token_and_key[8..];
                let id = key
                    .try_into()
                    .map(MovieId::from_be_bytes)
                    .map_err(|_| Error::Unsupported("malformed search document key".to_owned()))?;
                let frequency = read_u32(&frequency_data)? as f32;
                let dl = match self.doclen.get(key)? {
                    Some(dl) => read_u32(&dl)? as f32,
                    None => avgdl,
                };
                let bm25 =
                    idf * frequency * (K1 + 1.0) / (frequency + K1 * (1.0 - B + B * dl / avgdl));
                *scores.entry(id).or_insert(0.0) += bm25 * count as f32;
            }
        }

        let mut ranked = scores.into_iter().collect::<Vec<_>>();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CATALOG;

    fn ids(ranked: &[(MovieId, f32)]) -> Vec<MovieId> {
        ranked.iter().map(|(id, _)| *id).collect()
    }

    #[test]
    fn tokens() {
        let tokens = tokens_iter("Sci-Fi: The  SIGNAL, 2019!").collect::<Vec<_>>();
        assert_eq!(tokens, vec!["sci", "fi", "the", "signal", "2019"]);
    }

    #[test]
    fn query() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let index = SearchIndex::open(&db).unwrap();
        index.insert(1, "foo bar").unwrap();
        index.insert(2, "foo").unwrap();
        index.insert(3, "bar").unwrap();
        let res = index.query("foo").unwrap();
        assert_eq!(ids(&res), vec![2, 1]);
        assert!(res[0].1 > res[1].1);
        let res = index.query("foo bar").unwrap();
        assert_eq!(res[0].0, 1);
        assert_eq!(res.len(), 3);
        assert!(index.query("baz").unwrap().is_empty());
        assert!(index.query("").unwrap().is_empty());
    }

    #[test]
    fn empty_index() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let index = SearchIndex::open(&db).unwrap();
        assert!(index.query("signal").unwrap().is_empty());
    }

    #[test]
    fn catalog() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let index = SearchIndex::open(&db).unwrap();
        assert_eq!(index.index_catalog(CATALOG).unwrap(), CATALOG.len());
        let cs = db.checksum().unwrap();
        assert_eq!(index.index_catalog(CATALOG).unwrap(), 0);
        assert_eq!(cs, db.checksum().unwrap());

        let mut desert = ids(&index.query("desert").unwrap());
        desert.sort();
        assert_eq!(desert, vec![2, 7]);

        assert_eq!(index.query("NEBULA").unwrap()[0].0, 5);

        let res = index.query("signal lost").unwrap();
        assert_eq!(res[0].0, 10);
        let mut all = ids(&res);
        all.sort();
        assert_eq!(all, vec![2, 3, 10]);
    }
}
