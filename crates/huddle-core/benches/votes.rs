//! Vote board and broadcast benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use huddle_core::{AudienceKind, Audiences, ConnectionId, Participant, VoteBoard};
use huddle_protocol::{Role, ServerFrame};

fn roster(size: u64) -> Vec<Participant> {
    (0..size)
        .map(|id| Participant {
            id,
            email: format!("player-{id}@example.com"),
            role: Role::Player,
        })
        .collect()
}

/// Benchmark vote recording and statistics over growing rosters.
fn bench_votes(c: &mut Criterion) {
    let mut group = c.benchmark_group("votes");

    for size in [8u64, 64, 512] {
        let roster = roster(size);

        group.bench_with_input(BenchmarkId::new("record_vote", size), &roster, |b, roster| {
            let mut board = VoteBoard::new(roster);
            let mut i = 0usize;
            b.iter(|| {
                let email = &roster[i % roster.len()].email;
                board.record_vote(black_box(email), black_box(5));
                i += 1;
            });
        });

        let mut board = VoteBoard::new(&roster);
        for (i, participant) in roster.iter().enumerate() {
            board.record_vote(&participant.email, (i % 13) as u32);
        }
        group.bench_with_input(BenchmarkId::new("statistics", size), &board, |b, board| {
            b.iter(|| black_box(board.statistics()))
        });
    }

    group.finish();
}

/// Benchmark fan-out of one frame to every connection of a session.
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");

    for connections in [8usize, 64, 512] {
        let mut audiences = Audiences::default();
        let mut inboxes = Vec::with_capacity(connections);
        for i in 0..connections {
            let (tx, rx) = huddle_core::audience::outbox();
            audiences.join(&ConnectionId::new(format!("conn-{i}")), &tx, i == 0);
            inboxes.push(rx);
        }

        group.bench_function(BenchmarkId::new("timer", connections), |b| {
            b.iter(|| {
                audiences.publish_frame(AudienceKind::Everyone, black_box(ServerFrame::Timer(30)));
                for inbox in &mut inboxes {
                    while inbox.try_recv().is_ok() {}
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_votes, bench_publish);
criterion_main!(benches);
