//! Multi-node chain manager tests: rounds driven by one committee, then an
//! external rotation to another committee of the same nodes.

use anchorchain_cmtlog::{CmtLogConfig, InMemoryConsensusStateRegistry};
use anchorchain_node::{ChainManager, ChainMgrInput, CommitteeInfo, InMemoryCommitteeRegistry};
use anchorchain_simulation::TestContext;
use anchorchain_types::test_utils::*;
use anchorchain_types::{AnchorOutput, CommitteeAddress, LogIndex, NodeId};
use std::sync::Arc;

fn make_context(n: u8, seed: u64) -> TestContext<ChainManager> {
    let nodes: Vec<NodeId> = (1..=n).map(test_node).collect();
    let committees = Arc::new(InMemoryCommitteeRegistry::new());
    committees.insert(CommitteeInfo::new(test_committee(1), nodes.clone()));
    committees.insert(CommitteeInfo::new(test_committee(2), nodes.clone()));

    let managers = nodes.iter().map(|me| {
        let mgr = ChainManager::new(
            *me,
            test_chain(1),
            committees.clone(),
            Arc::new(InMemoryConsensusStateRegistry::new()),
            CmtLogConfig::default(),
        );
        (*me, mgr)
    });
    TestContext::new(managers, seed)
}

fn confirm_everywhere(tc: &mut TestContext<ChainManager>, ao: &AnchorOutput) {
    let inputs: Vec<_> = tc
        .node_ids()
        .into_iter()
        .map(|id| (id, ChainMgrInput::AnchorOutputConfirmed(ao.clone())))
        .collect();
    tc.with_inputs(inputs).run_all();
}

fn assert_need_consensus(
    tc: &TestContext<ChainManager>,
    committee: CommitteeAddress,
    log_index: LogIndex,
    base_ao: &AnchorOutput,
) {
    for (id, out) in tc.outputs() {
        let need = out
            .need_consensus
            .unwrap_or_else(|| panic!("node {id} needs no consensus"));
        assert_eq!(need.committee, committee, "node {id}");
        assert_eq!(need.log_index, log_index, "node {id}");
        assert_eq!(&need.base_ao, base_ao, "node {id}");
    }
}

fn run_basic(n: u8) {
    let mut tc = make_context(n, u64::from(n));
    let cmt_a = test_committee(1);
    let cmt_b = test_committee(2);

    let origin = test_anchor_output(test_chain(1), cmt_a, 0, 1);
    confirm_everywhere(&mut tc, &origin);
    tc.print_all_status_strings("Initial AO received");
    assert_need_consensus(&tc, cmt_a, LogIndex(1), &origin);
    for out in tc.outputs().into_values() {
        assert_eq!(out.committee_nodes.len(), usize::from(n));
    }

    let step2 = test_anchor_output(test_chain(1), cmt_a, 1, 2);
    let inputs: Vec<_> = tc
        .node_ids()
        .into_iter()
        .map(|id| {
            (
                id,
                ChainMgrInput::ConsensusOutputDone {
                    committee: cmt_a,
                    log_index: LogIndex(1),
                    proposed_base_ao: origin.id,
                    base_ao_id: origin.id,
                    next_ao: step2.clone(),
                },
            )
        })
        .collect();
    tc.with_inputs(inputs).run_all();
    assert_need_consensus(&tc, cmt_a, LogIndex(2), &step2);

    confirm_everywhere(&mut tc, &step2);
    assert_need_consensus(&tc, cmt_a, LogIndex(2), &step2);

    let rotated = test_anchor_output(test_chain(1), cmt_b, 2, 3);
    confirm_everywhere(&mut tc, &rotated);
    tc.print_all_status_strings("After external rotation");
    assert_need_consensus(&tc, cmt_b, LogIndex(1), &rotated);
}

#[test]
fn test_basic_n1() {
    run_basic(1);
}

#[test]
fn test_basic_n2() {
    run_basic(2);
}

#[test]
fn test_basic_n4() {
    run_basic(4);
}

#[test]
fn test_basic_n10() {
    run_basic(10);
}

#[test]
fn test_access_nodes_exposed_in_output() {
    let mut tc = make_context(4, 3);
    let access = vec![test_node(20), test_node(21)];
    let inputs: Vec<_> = tc
        .node_ids()
        .into_iter()
        .map(|id| (id, ChainMgrInput::AccessNodesUpdated(access.clone())))
        .collect();
    tc.with_inputs(inputs).run_all();
    for out in tc.outputs().into_values() {
        assert_eq!(out.access_nodes, access);
        assert!(out.need_consensus.is_none());
    }
}
