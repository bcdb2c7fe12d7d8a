use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use vmaudit_core::aggregate::aggregate;
use vmaudit_core::cancel::CancellationToken;
use vmaudit_core::classify::{Classifier, ClassifierSettings, SiblingCache};
use vmaudit_core::inventory::{FixtureInventory, VirtualDisk, VmHandle};
use vmaudit_core::path::{join_volume_path, normalize, DiskPath};
use vmaudit_core::registry;
use vmaudit_core::scanner::{is_auxiliary, AUXILIARY_SUFFIXES};
use vmaudit_core::types::{ClassificationStatus, SeverityBands, VolumeFileCandidate};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
}

fn status_strategy() -> impl Strategy<Value = ClassificationStatus> {
    prop_oneof![
        Just(ClassificationStatus::Registered),
        Just(ClassificationStatus::TemplateOrSnapshotHelper),
        Just(ClassificationStatus::ConfigAssociated),
        Just(ClassificationStatus::Orphaned),
        Just(ClassificationStatus::InferenceFailed),
    ]
}

fn candidate(folder: &str, file: &str, size: u64, days_ago: Option<i64>) -> VolumeFileCandidate {
    let folder_path = format!("[ds1] {folder}/");
    VolumeFileCandidate {
        volume_name: "ds1".to_string(),
        disk_path: DiskPath::new(join_volume_path(&folder_path, file)),
        folder_path,
        file_name: file.to_string(),
        size_bytes: size,
        modified_at: days_ago.map(|d| now() - Duration::days(d)),
        metadata_estimated: days_ago.is_none(),
    }
}

proptest! {
    #[test]
    fn normalize_is_deterministic_and_never_empty(raw in ".{0,64}") {
        let a = normalize(&raw);
        let b = normalize(&raw);
        prop_assert_eq!(&a, &b);
        prop_assert!(!a.is_empty());
        prop_assert!(a.contains(&raw));
    }

    #[test]
    fn exact_backing_path_is_registered(
        ds in "[a-z][a-z0-9]{0,7}",
        folder in "[a-z][a-z0-9]{0,11}",
        stem in "[a-z][a-z]{0,11}",
    ) {
        let raw = format!("[{ds}] {folder}/{stem}.vmdk");
        let vm = VmHandle {
            name: "vm".to_string(),
            template: false,
            disks: Some(vec![VirtualDisk {
                device_key: 2000,
                backing_file: Some(raw.clone()),
                capacity_bytes: None,
            }]),
            snapshots: vec![],
            snapshot_layout: None,
        };
        let reg = registry::build(&[vm], "vmdk", &CancellationToken::new()).unwrap().registry;

        let c = VolumeFileCandidate {
            volume_name: ds.clone(),
            folder_path: format!("[{ds}] {folder}/"),
            file_name: format!("{stem}.vmdk"),
            disk_path: DiskPath::new(raw),
            size_bytes: 1,
            modified_at: None,
            metadata_estimated: true,
        };
        let status = Classifier::new(&ClassifierSettings::default()).classify(
            &c,
            &reg,
            &FixtureInventory::default(),
            &mut SiblingCache::new(),
        );
        prop_assert_eq!(status, ClassificationStatus::Registered);
    }

    #[test]
    fn auxiliary_suffixes_are_never_candidates(
        stem in "[a-z][a-z0-9]{0,11}",
        idx in 0usize..AUXILIARY_SUFFIXES.len(),
    ) {
        let name = format!("{stem}{}.vmdk", AUXILIARY_SUFFIXES[idx]);
        prop_assert!(is_auxiliary(&name), "{}", name);
    }

    #[test]
    fn aggregation_is_idempotent_and_partitions(
        rows in prop::collection::vec(
            ("[a-c]{1,3}", 0u64..10_000, prop::option::of(0i64..400), status_strategy()),
            0..24,
        )
    ) {
        let pairs: Vec<(VolumeFileCandidate, ClassificationStatus)> = rows
            .iter()
            .enumerate()
            .map(|(i, (folder, size, days, status))| {
                (candidate(folder, &format!("d{i}.vmdk"), *size, *days), *status)
            })
            .collect();

        let first = aggregate(pairs.clone(), None, now(), SeverityBands::DISK);
        let mut reversed = pairs;
        reversed.reverse();
        let second = aggregate(reversed, None, now(), SeverityBands::DISK);
        prop_assert_eq!(&first, &second);

        prop_assert_eq!(first.all.len(), rows.len());
        let orphans_in_all = first
            .all
            .iter()
            .filter(|r| r.status == ClassificationStatus::Orphaned)
            .count();
        prop_assert_eq!(first.orphaned.len(), orphans_in_all);
        prop_assert!(first.orphaned.iter().all(|r| r.status == ClassificationStatus::Orphaned));
        prop_assert!(first.all.windows(2).all(|w| w[0].age_days >= w[1].age_days));
    }
}
