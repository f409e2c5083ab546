use nix::unistd::{Gid, Group, Uid, User};

use std::fs;

/// One entry of a snapshot's file list. Offsets are logical positions in
/// the decoded data stream; `None` means "no bytes" for directories and
/// "bytes in this snapshot" for `previous_index`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
pub struct FileMeta {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub permissions: u32,
    pub mtime: i64,
    pub size: u64,
    pub owner: String,
    pub group: String,
    pub data_offset: Option<u64>,
    pub previous_index: Option<usize>,
}

impl FileMeta {
    #[cfg(unix)]
    pub fn from_walk(name: impl Into<String>, metadata: &fs::Metadata) -> FileMeta {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let is_dir = metadata.is_dir();
        let (owner, group) = user_group_names(metadata.uid(), metadata.gid());

        FileMeta {
            name: name.into(),
            is_dir,
            is_symlink: metadata.file_type().is_symlink(),
            permissions: metadata.permissions().mode() & 0o777,
            mtime: metadata.mtime(),
            size: if is_dir { 0 } else { metadata.len() },
            owner,
            group,
            data_offset: None,
            previous_index: None,
        }
    }

    /// Whether the on-disk state differs from an older record of the same
    /// path. Contents are never hashed; the stat fields decide.
    pub fn changed(&self, new: &FileMeta) -> bool {
        self.is_dir != new.is_dir
            || self.is_symlink != new.is_symlink
            || self.size != new.size
            || self.mtime != new.mtime
            || self.permissions != new.permissions
            || self.owner != new.owner
            || self.group != new.group
    }
}

fn user_group_names(uid: u32, gid: u32) -> (String, String) {
    let owner = User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| uid.to_string());
    let group = Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_else(|| gid.to_string());
    (owner, group)
}

/// Resolve recorded names back to ids, if this system knows them.
pub fn user_group_ids(owner: &str, group: &str) -> (Option<Uid>, Option<Gid>) {
    let uid = User::from_name(owner).ok().flatten().map(|user| user.uid);
    let gid = Group::from_name(group).ok().flatten().map(|group| group.gid);
    (uid, gid)
}
