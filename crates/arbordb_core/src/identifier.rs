//! Frontend, client, history and transaction identifiers.
//!
//! Identifiers nest: a transaction belongs to a local history, which belongs
//! to a client generation of a frontend. Each level encodes its parent first
//! and then its own numbers as compact longs.

use arbordb_codec::{CodecResult, DataInput, DataOutput};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

/// An identifier with a stable wire encoding.
pub trait WireIdentifier: Clone + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Writes the identifier.
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()>;

    /// Reads an identifier.
    fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self>;

    /// Encodes the identifier into a fresh buffer.
    ///
    /// # Panics
    ///
    /// Panics if the identifier cannot be encoded, which writing to memory
    /// never causes for a well-formed identifier.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Err(err) = self.write_to(&mut out) {
            panic!("encoding {self} into memory failed: {err}");
        }
        out
    }
}

/// A frontend instance: a cluster member name and the kind of client it runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrontendIdentifier {
    member_name: Arc<str>,
    client_type: Arc<str>,
}

impl FrontendIdentifier {
    /// Creates a frontend identifier.
    pub fn new(member_name: impl Into<Arc<str>>, client_type: impl Into<Arc<str>>) -> Self {
        Self {
            member_name: member_name.into(),
            client_type: client_type.into(),
        }
    }

    /// Returns the member name.
    #[must_use]
    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    /// Returns the client type.
    #[must_use]
    pub fn client_type(&self) -> &str {
        &self.client_type
    }
}

impl fmt::Display for FrontendIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-frontend-{}", self.member_name, self.client_type)
    }
}

impl WireIdentifier for FrontendIdentifier {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        out.write_str(&self.member_name)?;
        out.write_str(&self.client_type)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let member_name = input.read_str()?;
        let client_type = input.read_str()?;
        Ok(Self::new(member_name, client_type))
    }
}

/// One generation of a frontend. A frontend restarting gets a new generation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientIdentifier {
    frontend: FrontendIdentifier,
    generation: u64,
}

impl ClientIdentifier {
    /// Creates a client identifier.
    #[must_use]
    pub fn new(frontend: FrontendIdentifier, generation: u64) -> Self {
        Self {
            frontend,
            generation,
        }
    }

    /// Returns the frontend.
    #[must_use]
    pub fn frontend(&self) -> &FrontendIdentifier {
        &self.frontend
    }

    /// Returns the generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-fe-{}", self.frontend, self.generation)
    }
}

impl WireIdentifier for ClientIdentifier {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        self.frontend.write_to(out)?;
        out.write_long(self.generation)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let frontend = FrontendIdentifier::read_from(input)?;
        let generation = input.read_long()?;
        Ok(Self::new(frontend, generation))
    }
}

/// A local history: an ordered sequence of transactions from one client.
///
/// History 0 is the client's implicit single-transaction history. The cookie
/// distinguishes shards a history was split across.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalHistoryIdentifier {
    client: ClientIdentifier,
    history_id: u64,
    cookie: u64,
}

impl LocalHistoryIdentifier {
    /// Creates a history identifier.
    #[must_use]
    pub fn new(client: ClientIdentifier, history_id: u64, cookie: u64) -> Self {
        Self {
            client,
            history_id,
            cookie,
        }
    }

    /// Returns the owning client.
    #[must_use]
    pub fn client(&self) -> &ClientIdentifier {
        &self.client
    }

    /// Returns the history number.
    #[must_use]
    pub fn history_id(&self) -> u64 {
        self.history_id
    }

    /// Returns the cookie.
    #[must_use]
    pub fn cookie(&self) -> u64 {
        self.cookie
    }
}

impl fmt::Display for LocalHistoryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-chn-{}", self.client, self.history_id)?;
        if self.cookie != 0 {
            write!(f, "-{}", self.cookie)?;
        }
        Ok(())
    }
}

impl WireIdentifier for LocalHistoryIdentifier {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        self.client.write_to(out)?;
        out.write_longs(self.history_id, self.cookie)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let client = ClientIdentifier::read_from(input)?;
        let (history_id, cookie) = input.read_longs()?;
        Ok(Self::new(client, history_id, cookie))
    }
}

/// A transaction within a local history.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionIdentifier {
    history: LocalHistoryIdentifier,
    transaction_id: u64,
}

impl TransactionIdentifier {
    /// Creates a transaction identifier.
    #[must_use]
    pub fn new(history: LocalHistoryIdentifier, transaction_id: u64) -> Self {
        Self {
            history,
            transaction_id,
        }
    }

    /// Returns the owning history.
    #[must_use]
    pub fn history(&self) -> &LocalHistoryIdentifier {
        &self.history
    }

    /// Returns the transaction number within the history.
    #[must_use]
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }
}

impl fmt::Display for TransactionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-txn-{}", self.history, self.transaction_id)
    }
}

impl WireIdentifier for TransactionIdentifier {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> CodecResult<()> {
        self.history.write_to(out)?;
        out.write_long(self.transaction_id)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let history = LocalHistoryIdentifier::read_from(input)?;
        let transaction_id = input.read_long()?;
        Ok(Self::new(history, transaction_id))
    }
}
