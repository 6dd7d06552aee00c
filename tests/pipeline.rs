mod common;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use scimago_harvest::checkpoint::{CheckpointFile, RetryList};
use scimago_harvest::domain::{Document, TargetName};
use scimago_harvest::error::HarvestError;
use scimago_harvest::fetch::Fetcher;
use scimago_harvest::pipeline::Pipeline;
use scimago_harvest::store::CatalogStore;

use common::{MockSite, Workspace, broken_detail_page, detail_page, name};

#[test]
fn second_run_finds_nothing_to_do_and_keeps_output() {
    let workspace = Workspace::new();
    workspace.write_input(&["Alpha Letters", "Beta Review", "Gamma Notes", "Delta"]);
    let site = MockSite::new()
        .journal("Alpha Letters", &detail_page("1111-1111"))
        .journal("Beta Review", &detail_page("2222-2222"))
        .journal("Gamma Notes", &detail_page("3333-3333"));
    let config = workspace.config(1);
    let pipeline = Pipeline::from_config(&config).unwrap();

    let first = pipeline.run(|| Ok(&site)).unwrap();
    assert_eq!(first.pending, 4);
    assert_eq!(first.counters.found, 3);
    assert_eq!(first.counters.not_found, 1);

    let store = CatalogStore::new(config.input.clone(), config.output.clone());
    let after_first = store.load_output().unwrap();
    assert_eq!(after_first.len(), 3);
    assert_eq!(
        after_first[&name("beta review")].issn.as_deref(),
        Some("2222-2222")
    );

    let calls = site.calls();
    let second = pipeline.run(|| Ok(&site)).unwrap();
    assert_eq!(second.pending, 0);
    assert_eq!(second.counters.processed, 0);
    assert_eq!(site.calls(), calls);
    assert_eq!(store.load_output().unwrap(), after_first);
}

#[test]
fn checkpoint_advances_past_failed_titles() {
    let workspace = Workspace::new();
    let titles = (0..10)
        .map(|index| format!("journal {index:02}"))
        .collect::<Vec<_>>();
    let refs = titles.iter().map(String::as_str).collect::<Vec<_>>();
    workspace.write_input(&refs);

    let mut site = MockSite::new();
    for (index, title) in titles.iter().enumerate() {
        site = if index == 5 {
            site.failing(title)
        } else {
            site.journal(title, &detail_page("0000-0000"))
        };
    }
    let config = workspace.config(1);
    let pipeline = Pipeline::from_config(&config).unwrap();

    let summary = pipeline.run(|| Ok(&site)).unwrap();
    assert_eq!(summary.counters.processed, 10);
    assert_eq!(summary.counters.found, 9);
    assert_eq!(summary.counters.failed, 1);
    assert_eq!(summary.checkpoint.as_deref(), Some("journal 09"));

    let checkpoint = CheckpointFile::new(config.checkpoint.clone());
    assert_eq!(checkpoint.load().unwrap(), Some(name("journal 09")));

    let resumed = pipeline.run(|| Ok(&site)).unwrap();
    assert_eq!(resumed.counters.processed, 0);
}

#[test]
fn extraction_failure_is_retried_by_the_next_run() {
    let workspace = Workspace::new();
    workspace.write_input(&["a journal", "b journal"]);
    let site = MockSite::new()
        .journal("A Journal", &detail_page("1234-5678"))
        .journal("B Journal", &broken_detail_page());
    let config = workspace.config(1);
    let pipeline = Pipeline::from_config(&config).unwrap();

    let summary = pipeline.run(|| Ok(&site)).unwrap();
    assert_eq!(summary.counters.found, 1);
    assert_eq!(summary.counters.extraction_failed, 1);
    assert_eq!(summary.checkpoint.as_deref(), Some("a journal"));

    let plan = pipeline.plan().unwrap();
    assert_eq!(plan.pending, vec![name("b journal")]);
}

#[test]
fn extraction_failure_before_a_later_success_stays_pending() {
    let workspace = Workspace::new();
    workspace.write_input(&["a journal", "b journal"]);
    let broken = MockSite::new()
        .journal("A Journal", &broken_detail_page())
        .journal("B Journal", &detail_page("2222-2222"));
    let config = workspace.config(1);
    let pipeline = Pipeline::from_config(&config).unwrap();

    let first = pipeline.run(|| Ok(&broken)).unwrap();
    assert_eq!(first.counters.extraction_failed, 1);
    assert_eq!(first.checkpoint.as_deref(), Some("b journal"));
    assert_eq!(first.retry, 1);
    assert_eq!(pipeline.plan().unwrap().pending, vec![name("a journal")]);

    let fixed = MockSite::new().journal("A Journal", &detail_page("1111-1111"));
    let second = pipeline.run(|| Ok(&fixed)).unwrap();
    assert_eq!(second.counters.processed, 1);
    assert_eq!(second.counters.found, 1);
    assert_eq!(second.retry, 0);

    let retry = RetryList::new(config.retry_list.clone());
    assert!(!retry.path().as_std_path().exists());
    assert!(pipeline.plan().unwrap().pending.is_empty());
    let store = CatalogStore::new(config.input.clone(), config.output.clone());
    assert_eq!(store.load_output().unwrap().len(), 2);
}

#[test]
fn resume_follows_source_order() {
    let workspace = Workspace::new();
    workspace.write_input(&["Zeta Journal", "Alpha Journal", "Mu Journal"]);
    let site = MockSite::new()
        .journal("Zeta Journal", &detail_page("1"))
        .journal("Alpha Journal", &detail_page("2"))
        .journal("Mu Journal", &detail_page("3"));
    let config = workspace.config(1);
    let pipeline = Pipeline::from_config(&config).unwrap();

    CheckpointFile::new(config.checkpoint.clone())
        .save(&name("zeta journal"))
        .unwrap();
    assert_eq!(
        pipeline.plan().unwrap().pending,
        vec![name("alpha journal"), name("mu journal")]
    );

    pipeline.run(|| Ok(&site)).unwrap();
    let store = CatalogStore::new(config.input.clone(), config.output.clone());
    let output = store.load_output().unwrap();
    let order = output.keys().map(TargetName::as_str).collect::<Vec<_>>();
    assert_eq!(order, vec!["alpha journal", "mu journal"]);
}

/// Replaces the checkpoint file with a directory on its first request, so
/// that every checkpoint write of the run fails.
struct CheckpointBlocker<'a> {
    site: &'a MockSite,
    checkpoint: Utf8PathBuf,
}

impl Fetcher for CheckpointBlocker<'_> {
    fn fetch(&self, url: &str) -> Result<Document, HarvestError> {
        std::fs::create_dir_all(self.checkpoint.as_std_path()).unwrap();
        self.site.fetch(url)
    }
}

#[test]
fn checkpoint_write_failure_still_saves_output() {
    let workspace = Workspace::new();
    workspace.write_input(&["first", "second"]);
    let site = MockSite::new()
        .journal("first", &detail_page("1"))
        .journal("second", &detail_page("2"));
    let config = workspace.config(1);
    let pipeline = Pipeline::from_config(&config).unwrap();

    let err = pipeline
        .run(|| {
            Ok(CheckpointBlocker {
                site: &site,
                checkpoint: config.checkpoint.clone(),
            })
        })
        .unwrap_err();
    assert_matches!(err, HarvestError::CheckpointWrite(_));

    let store = CatalogStore::new(config.input.clone(), config.output.clone());
    assert_eq!(store.load_output().unwrap().len(), 2);
}

#[test]
fn snapshot_failure_does_not_stop_the_run() {
    let workspace = Workspace::new();
    workspace.write_input(&["first", "second", "third"]);
    let site = MockSite::new()
        .journal("first", &detail_page("1"))
        .journal("third", &detail_page("3"));
    std::fs::write(workspace.root.join("blocker").as_std_path(), "not a directory").unwrap();
    let mut config = workspace.config(1);
    config.partial_prefix = workspace.root.join("blocker/partial");
    config.snapshot_every = 1;
    let pipeline = Pipeline::from_config(&config).unwrap();

    let summary = pipeline.run(|| Ok(&site)).unwrap();
    assert_eq!(summary.counters.processed, 3);
    assert_eq!(summary.counters.found, 2);
    assert_eq!(summary.checkpoint.as_deref(), Some("third"));

    let store = CatalogStore::new(config.input.clone(), config.output.clone());
    assert_eq!(store.load_output().unwrap().len(), 2);
}

#[test]
fn concurrent_workers_lose_no_updates() {
    let workspace = Workspace::new();
    let titles = (0..40)
        .map(|index| format!("title {index:03}"))
        .collect::<Vec<_>>();
    let refs = titles.iter().map(String::as_str).collect::<Vec<_>>();
    workspace.write_input(&refs);

    let mut site = MockSite::new().with_jitter();
    for (index, title) in titles.iter().enumerate() {
        if index % 4 != 0 {
            site = site.journal(title, &detail_page(&format!("{index:04}-0000")));
        }
    }
    let config = workspace.config(8);
    let pipeline = Pipeline::from_config(&config).unwrap();

    let summary = pipeline.run(|| Ok(&site)).unwrap();
    let counters = summary.counters;
    assert_eq!(counters.processed, 40);
    assert_eq!(counters.found, 30);
    assert_eq!(counters.not_found, 10);
    assert_eq!(
        counters.found + counters.not_found + counters.failed + counters.extraction_failed,
        40
    );

    let store = CatalogStore::new(config.input.clone(), config.output.clone());
    let output = store.load_output().unwrap();
    assert_eq!(output.len(), 30);
    assert_eq!(
        output[&name("title 005")].issn.as_deref(),
        Some("0005-0000")
    );

    let last = CheckpointFile::new(config.checkpoint.clone())
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(summary.checkpoint.as_deref(), Some(last.as_str()));
    let index = titles.iter().position(|title| title == last.as_str()).unwrap();
    if index % 4 == 0 {
        assert!(!output.contains_key(&last));
    } else {
        assert!(output.contains_key(&last));
    }
}

#[test]
fn partial_snapshots_are_written_every_interval() {
    let workspace = Workspace::new();
    workspace.write_input(&["one", "two", "three", "four", "five"]);
    let site = MockSite::new()
        .journal("one", &detail_page("1"))
        .journal("two", &detail_page("2"))
        .journal("four", &detail_page("4"));
    let mut config = workspace.config(1);
    config.snapshot_every = 2;
    let pipeline = Pipeline::from_config(&config).unwrap();

    pipeline.run(|| Ok(&site)).unwrap();

    assert!(workspace.root.join("partial_2.json").as_std_path().exists());
    assert!(workspace.root.join("partial_4.json").as_std_path().exists());
    assert!(!workspace.root.join("partial_5.json").as_std_path().exists());
}

#[test]
fn titles_already_cataloged_are_not_fetched() {
    let workspace = Workspace::new();
    workspace.write_input(&["Known Journal"]);
    let config = workspace.config(1);
    std::fs::write(
        config.output.as_std_path(),
        r#"{ "known journal": { "issn": "9999-9999" } }"#,
    )
    .unwrap();
    let site = MockSite::new();
    let pipeline = Pipeline::from_config(&config).unwrap();

    let summary = pipeline.run(|| Ok(&site)).unwrap();
    assert_eq!(summary.pending, 0);
    assert_eq!(site.calls(), 0);
}

#[test]
fn missing_input_catalog_is_fatal() {
    let workspace = Workspace::new();
    let config = workspace.config(1);
    let pipeline = Pipeline::from_config(&config).unwrap();
    let site = MockSite::new();

    let err = pipeline.run(|| Ok(&site)).unwrap_err();
    assert_matches!(err, HarvestError::InputUnavailable { .. });
    assert_eq!(site.calls(), 0);
}

#[test]
fn corrupt_output_catalog_is_fatal() {
    let workspace = Workspace::new();
    workspace.write_input(&["anything"]);
    let config = workspace.config(1);
    std::fs::write(config.output.as_std_path(), "{ not json").unwrap();
    let pipeline = Pipeline::from_config(&config).unwrap();
    let site = MockSite::new();

    let err = pipeline.run(|| Ok(&site)).unwrap_err();
    assert_matches!(err, HarvestError::CatalogCorrupt { .. });
}
