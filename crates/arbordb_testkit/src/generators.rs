//! Property-based test generators using proptest.
//!
//! Trees are kept shallow so that encoded candidates stay well below the
//! stream nesting limit.

use arbordb_codec::{
    CandidateNode, InstanceIdentifier, ModificationKind, NormalizedNode, PathArgument, QName,
    TreeCandidate, UnsignedLongSet, Value,
};
use arbordb_core::{
    AbortTransactionPayload, ClientIdentifier, CloseLocalHistoryPayload, CommitTransactionPayload,
    CreateLocalHistoryPayload, DisableTrackingPayload, FrontendIdentifier, LocalHistoryIdentifier,
    Payload, PayloadConfig, PurgeLocalHistoryPayload, PurgeTransactionPayload,
    SkipTransactionsPayload, TransactionIdentifier,
};
use proptest::prelude::*;

const NAMESPACES: &[&str] = &[
    "urn:arbordb:test:inventory",
    "urn:arbordb:test:topology",
    "urn:ietf:params:xml:ns:yang:ietf-interfaces",
];

/// Strategy for qualified names from a small set of namespaces.
pub fn qname_strategy() -> impl Strategy<Value = QName> {
    (
        prop::sample::select(NAMESPACES),
        prop::string::string_regex("[a-z][a-z0-9-]{0,11}").expect("Invalid regex"),
    )
        .prop_map(|(namespace, local)| QName::new(namespace, local))
}

/// Strategy for leaf values which do not reference other nodes.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Empty),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(Value::Uint),
        prop::string::string_regex("[ -~]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Binary),
    ]
}

/// Strategy for path steps of every kind.
pub fn path_argument_strategy() -> impl Strategy<Value = PathArgument> {
    prop_oneof![
        4 => qname_strategy().prop_map(PathArgument::NodeIdentifier),
        1 => (
            qname_strategy(),
            prop::collection::btree_map(qname_strategy(), scalar_value_strategy(), 1..3),
        )
            .prop_map(|(name, keys)| PathArgument::NodeWithPredicates(name, keys)),
        1 => (qname_strategy(), scalar_value_strategy())
            .prop_map(|(name, value)| PathArgument::NodeWithValue(name, value)),
    ]
}

/// Strategy for paths of up to `max_depth` steps.
pub fn instance_identifier_strategy(max_depth: usize) -> impl Strategy<Value = InstanceIdentifier> {
    prop::collection::vec(path_argument_strategy(), 0..=max_depth).prop_map(InstanceIdentifier::new)
}

/// Strategy for leaf values of every kind.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        5 => scalar_value_strategy(),
        1 => instance_identifier_strategy(3).prop_map(Value::Identifier),
    ]
}

/// Strategy for trees up to four levels deep.
pub fn normalized_node_strategy() -> impl Strategy<Value = NormalizedNode> {
    let leaf = (path_argument_strategy(), value_strategy())
        .prop_map(|(name, value)| NormalizedNode::leaf(name, value));
    leaf.prop_recursive(3, 32, 4, |inner| {
        (
            path_argument_strategy(),
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(name, children)| NormalizedNode::container(name, children))
    })
}

/// Strategy for candidate nodes, including unmodified ones the encoder
/// elides.
pub fn candidate_node_strategy() -> impl Strategy<Value = CandidateNode> {
    let terminal = prop_oneof![
        3 => normalized_node_strategy().prop_map(CandidateNode::write),
        2 => path_argument_strategy().prop_map(CandidateNode::delete),
        1 => path_argument_strategy()
            .prop_map(|name| CandidateNode::Unmodified { name: Some(name) }),
    ];
    terminal.prop_recursive(3, 24, 4, |inner| {
        (
            prop::sample::select(vec![
                ModificationKind::SubtreeModified,
                ModificationKind::Appeared,
                ModificationKind::Disappeared,
            ]),
            path_argument_strategy(),
            prop::collection::vec(inner, 1..4),
        )
            .prop_map(|(kind, name, children)| CandidateNode::modified(kind, Some(name), children))
    })
}

/// Strategy for rooted candidates.
pub fn tree_candidate_strategy() -> impl Strategy<Value = TreeCandidate> {
    (instance_identifier_strategy(3), candidate_node_strategy())
        .prop_map(|(path, root)| TreeCandidate::new(path, root))
}

/// Strategy for frontend identities.
pub fn frontend_identifier_strategy() -> impl Strategy<Value = FrontendIdentifier> {
    (
        prop::string::string_regex("member-[1-9][0-9]?").expect("Invalid regex"),
        prop::sample::select(vec!["datastore-config", "datastore-oper", "rpc-broker"]),
    )
        .prop_map(|(member, kind)| FrontendIdentifier::new(member, kind))
}

/// Strategy for client identities.
pub fn client_identifier_strategy() -> impl Strategy<Value = ClientIdentifier> {
    (frontend_identifier_strategy(), any::<u64>())
        .prop_map(|(frontend, generation)| ClientIdentifier::new(frontend, generation))
}

/// Strategy for local history identities.
pub fn history_identifier_strategy() -> impl Strategy<Value = LocalHistoryIdentifier> {
    (client_identifier_strategy(), any::<u64>(), any::<u64>())
        .prop_map(|(client, history, cookie)| LocalHistoryIdentifier::new(client, history, cookie))
}

/// Strategy for transaction identities.
pub fn transaction_identifier_strategy() -> impl Strategy<Value = TransactionIdentifier> {
    (history_identifier_strategy(), any::<u64>())
        .prop_map(|(history, id)| TransactionIdentifier::new(history, id))
}

/// Strategy for id sets made of a few runs.
pub fn unsigned_long_set_strategy() -> impl Strategy<Value = UnsignedLongSet> {
    prop::collection::vec((any::<u64>(), 0u64..16), 0..8).prop_map(|runs| {
        let mut set = UnsignedLongSet::new();
        for (start, len) in runs {
            set.add_range(start, start.saturating_add(len));
        }
        set
    })
}

/// Strategy for payloads of every kind, encoded with `config`.
pub fn payload_strategy(config: PayloadConfig) -> impl Strategy<Value = Payload> {
    prop_oneof![
        transaction_identifier_strategy()
            .prop_map(|tx| Payload::Abort(AbortTransactionPayload::create(tx))),
        (transaction_identifier_strategy(), tree_candidate_strategy()).prop_map(
            move |(tx, candidate)| {
                Payload::Commit(
                    CommitTransactionPayload::create(tx, &candidate, &config)
                        .expect("encode commit"),
                )
            }
        ),
        transaction_identifier_strategy()
            .prop_map(|tx| Payload::Purge(PurgeTransactionPayload::create(tx))),
        history_identifier_strategy()
            .prop_map(|history| Payload::PurgeHistory(PurgeLocalHistoryPayload::create(history))),
        history_identifier_strategy()
            .prop_map(|history| Payload::CloseHistory(CloseLocalHistoryPayload::create(history))),
        history_identifier_strategy().prop_map(|history| {
            Payload::CreateHistory(CreateLocalHistoryPayload::create(history))
        }),
        (history_identifier_strategy(), unsigned_long_set_strategy()).prop_map(
            |(history, ids)| {
                Payload::SkipTransactions(SkipTransactionsPayload::create(history, ids))
            }
        ),
        client_identifier_strategy()
            .prop_map(|client| Payload::DisableTracking(DisableTrackingPayload::create(client))),
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
