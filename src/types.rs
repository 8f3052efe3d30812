pub type ReplicaID = usize;
pub type ViewNumber = usize;
pub type Timestamp = u64;
