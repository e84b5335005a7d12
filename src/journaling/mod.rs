mod backup;

pub use backup::{
    AlwaysSample, BackupCategory, BackupJournal, BackupSampler, NeverSample, RandomSampler,
};
