//! Write-lock races: many threads, one alias vs many aliases.

use std::sync::{Arc, Barrier};
use std::thread;

use golden_core::RepoAlias;
use golden_store::{AliasManager, RepoLayout, WriteLockManager};
use tempfile::TempDir;

const RACERS: usize = 16;

#[test]
fn racing_acquires_on_one_alias_have_exactly_one_winner() {
    let root = TempDir::new().expect("root");
    let layout = RepoLayout::new(root.path());
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            // Separate manager per thread: nothing in-memory is shared.
            let locks = WriteLockManager::new(&layout);
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                locks
                    .acquire(&RepoAlias::from("shared"), &format!("writer-{i}"))
                    .expect("acquire")
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().expect("join")).collect();
    assert_eq!(results.iter().filter(|won| **won).count(), 1, "{results:?}");
    assert_eq!(results.iter().filter(|won| !**won).count(), RACERS - 1);

    let holder = WriteLockManager::new(&layout)
        .lock_info(&RepoAlias::from("shared"))
        .expect("lock info")
        .expect("held");
    assert!(holder.owner.starts_with("writer-"));
}

#[test]
fn racing_acquires_on_distinct_aliases_all_succeed() {
    let root = TempDir::new().expect("root");
    let layout = RepoLayout::new(root.path());
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let locks = WriteLockManager::new(&layout);
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                locks
                    .acquire(&RepoAlias::from(format!("repo-{i}")), "writer")
                    .expect("acquire")
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .filter(|won| *won)
        .count();
    assert_eq!(winners, RACERS);
}

#[test]
fn lock_is_visible_to_an_independent_manager() {
    let root = TempDir::new().expect("root");
    let writer_side = WriteLockManager::new(&RepoLayout::new(root.path()));
    let refresh_side = WriteLockManager::new(&RepoLayout::new(root.path()));
    let alias = RepoAlias::from("notes");

    assert!(writer_side.acquire(&alias, "content-writer").expect("acquire"));
    assert!(refresh_side.is_locked(&alias));
    assert!(writer_side.release(&alias, "content-writer").expect("release"));
    assert!(!refresh_side.is_locked(&alias));
}

#[test]
fn readers_never_see_a_missing_alias_during_swaps() {
    let root = TempDir::new().expect("root");
    let layout = RepoLayout::new(root.path());
    let targets: Vec<_> = (0..4)
        .map(|i| {
            let dir = layout.versioned_dir("docs").join(format!("v_{i}"));
            std::fs::create_dir_all(&dir).expect("mkdir");
            dir
        })
        .collect();
    let alias = RepoAlias::from("docs");
    AliasManager::new(&layout)
        .swap_alias(&alias, &targets[0])
        .expect("initial swap");

    let writer = {
        let aliases = AliasManager::new(&layout);
        let targets = targets.clone();
        let alias = alias.clone();
        thread::spawn(move || {
            for round in 0..200 {
                aliases
                    .swap_alias(&alias, &targets[round % targets.len()])
                    .expect("swap");
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let aliases = AliasManager::new(&layout);
            let targets = targets.clone();
            let alias = alias.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let seen = aliases.read_alias(&alias).expect("alias must always resolve");
                    assert!(targets.contains(&seen), "unexpected target {seen:?}");
                }
            })
        })
        .collect();

    writer.join().expect("writer");
    for reader in readers {
        reader.join().expect("reader");
    }
}
