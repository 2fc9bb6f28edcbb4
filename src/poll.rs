use std::collections::BTreeMap;
use std::future::Future;

use tracing::warn;

use crate::registers::{self, DecodeError, Decoded};
use crate::schema::ResolvedSchema;

/// Something holding registers can be read from.
pub trait WordSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read `count` registers starting at the 1-based holding register `address`.
    fn read_words(
        &self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, Self::Error>>;
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("register {0} is not a holding register")]
    Address(u32),
    #[error("could not read the registers")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("could not decode the registers")]
    Decode(#[source] DecodeError),
}

#[derive(Debug)]
pub struct Reading<'a> {
    pub schema: &'a ResolvedSchema,
    pub outcome: Result<Decoded, ReadError>,
}

/// Register schema organized for lookups and reads.
pub struct Poller {
    entries: Vec<ResolvedSchema>,
    groups: BTreeMap<String, Vec<usize>>,
}

impl Poller {
    pub fn new(entries: Vec<ResolvedSchema>) -> Self {
        let mut groups = BTreeMap::<String, Vec<usize>>::new();
        for (index, entry) in entries.iter().enumerate() {
            groups.entry(entry.group.clone()).or_default().push(index);
        }
        Self { entries, groups }
    }

    pub fn entries(&self) -> &[ResolvedSchema] {
        &self.entries
    }

    /// Group names, sorted.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn group(&self, group: &str) -> impl Iterator<Item = &ResolvedSchema> {
        self.groups.get(group).into_iter().flatten().map(|&index| &self.entries[index])
    }

    pub fn lookup(&self, group: &str, name: &str) -> Option<&ResolvedSchema> {
        self.group(group).find(|entry| entry.name == name)
    }

    pub fn decode(&self, entry: &ResolvedSchema, words: &[u16]) -> Result<Decoded, DecodeError> {
        registers::decode(entry, words)
    }

    /// Read and decode a single register.
    pub async fn poll<'a, S: WordSource>(&self, source: &S, entry: &'a ResolvedSchema) -> Reading<'a> {
        let outcome = async {
            let address = entry.address().ok_or(ReadError::Address(entry.register))?;
            let words = source
                .read_words(address, entry.points)
                .await
                .map_err(|e| ReadError::Transport(Box::new(e)))?;
            self.decode(entry, &words).map_err(ReadError::Decode)
        }
        .await;
        if let Err(e) = &outcome {
            warn!(
                message = "could not read register",
                register = entry.register,
                name = %entry.name,
                error = (e as &dyn std::error::Error)
            );
        }
        Reading { schema: entry, outcome }
    }

    /// Read all registers of a group. A failing register does not stop the others from being read.
    pub async fn poll_group<S: WordSource>(&self, source: &S, group: &str) -> Vec<Reading<'_>> {
        let mut readings = Vec::new();
        for entry in self.group(group) {
            readings.push(self.poll(source, entry).await);
        }
        readings
    }

    pub async fn poll_all<S: WordSource>(&self, source: &S) -> Vec<Reading<'_>> {
        let mut readings = Vec::with_capacity(self.entries.len());
        for group in self.groups() {
            readings.extend(self.poll_group(source, group).await);
        }
        readings
    }
}
