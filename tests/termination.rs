mod util;
use util::*;

use grape_bsp::prelude::*;
use proptest::prelude::*;

/// Per round, per fragment: (sends a message, forces continuation).
type Plan = Vec<Vec<(bool, bool)>>;

fn votes_for(plan: &Plan, fnum: usize) -> Vec<Vec<bool>> {
    run_cluster(fnum, |rank, comm| {
        let mut mm = started_manager(&comm);
        mm.init_channels(1, 1024, 1024).unwrap();
        let mut votes = Vec::new();
        for round in plan {
            let (send, force) = round[rank];
            mm.start_round().unwrap();
            if send {
                mm.channels_mut()[0].send_to_fragment((rank + 1) % fnum, &1u32);
            }
            if force {
                mm.force_continue();
            }
            mm.finish_round().unwrap();
            votes.push(mm.to_terminate().unwrap());
        }
        mm.finalize().unwrap();
        votes
    })
}

fn plan_strategy() -> impl Strategy<Value = (usize, Plan)> {
    (1usize..=3).prop_flat_map(|fnum| {
        (
            Just(fnum),
            prop::collection::vec(prop::collection::vec(any::<(bool, bool)>(), fnum), 1..5),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn terminates_iff_globally_quiet((fnum, plan) in plan_strategy()) {
        let votes = votes_for(&plan, fnum);
        for (r, round) in plan.iter().enumerate() {
            let expect = !round.iter().any(|&(send, force)| send || force);
            for fragment_votes in &votes {
                prop_assert_eq!(fragment_votes[r], expect, "round {} plan {:?}", r, round);
            }
        }
    }
}

#[test]
fn force_terminate_wins_over_activity() {
    let results = run_cluster(3, |rank, comm| {
        let mut mm = started_manager(&comm);
        mm.init_channels(1, 64, 64).unwrap();
        mm.start_round().unwrap();
        match rank {
            1 => mm.force_terminate("bad input on 1"),
            2 => {
                mm.force_continue();
                mm.channels_mut()[0].send_to_fragment(0, &7u64);
            }
            _ => {}
        }
        mm.finish_round().unwrap();
        let done = mm.to_terminate().unwrap();
        let info = mm.terminate_info().clone();
        mm.finalize().unwrap();
        (done, info)
    });
    for (done, info) in results {
        assert!(done);
        assert!(!info.success);
        assert_eq!(info.info, vec!["".to_string(), "bad input on 1".into(), "".into()]);
    }
}

/// Keeps the cluster alive forever unless fragment 0 gives up in round 3.
#[derive(Default)]
struct GiveUp;

struct Nothing;

impl AppContext<EdgecutFragment> for Nothing {
    type Args = ();

    fn init(_: &EdgecutFragment, _: ()) -> Self {
        Nothing
    }

    fn output(&self, _: &EdgecutFragment, _: &mut dyn std::io::Write) -> Result<(), BspError> {
        Ok(())
    }
}

impl App<EdgecutFragment> for GiveUp {
    type Context = Nothing;

    fn peval<C: Communicator>(
        &self,
        _: &EdgecutFragment,
        _: &mut Nothing,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        messages.force_continue();
        Ok(())
    }

    fn inc_eval<C: Communicator>(
        &self,
        frag: &EdgecutFragment,
        _: &mut Nothing,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        if frag.fid() == 0 && messages.round() == 3 {
            messages.force_terminate(format!("gave up in round {}", messages.round()));
        } else {
            messages.force_continue();
        }
        Ok(())
    }
}

#[test]
fn worker_stops_on_forced_termination() {
    let vm = VertexMap::hash_partitioned(2, 0..4u64);
    let results = run_cluster(2, |rank, comm| {
        let frag = EdgecutFragment::new(rank, &vm, &[], true);
        let mut worker = Worker::new(GiveUp, frag);
        worker.init(&comm, &ParallelEngineSpec::with_threads(2)).unwrap();
        worker.query(()).unwrap();
        (worker.rounds(), worker.terminate_info().clone())
    });
    for (rounds, info) in results {
        assert_eq!(rounds, 4);
        assert!(!info.success);
        assert_eq!(info.info, vec!["gave up in round 3".to_string(), String::new()]);
    }
}

#[test]
fn fragment_count_must_match_cluster() {
    let vm = VertexMap::hash_partitioned(3, 0..4u64);
    let comm = LocalComm::cluster(2).remove(0);
    let frag = EdgecutFragment::new(0, &vm, &[], true);
    let mut worker: Worker<GiveUp, _, LocalComm> = Worker::new(GiveUp, frag);
    assert_eq!(
        worker.init(&comm, &ParallelEngineSpec::with_threads(1)).err(),
        Some(BspError::FragmentMismatch { expected: 2, got: 3 })
    );
}
