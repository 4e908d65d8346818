//! Share-bases from the configuration, backed by the native filesystem.

use crate::config::ShareConfig;
use crate::native_fs::NativeFs;
use std::sync::Arc;
use subscription_core::{FileSystem, ShareBases};
use tracing::warn;

/// Configured share-bases; index order is configuration order.
pub struct ConfiguredShares {
    shares: Vec<(String, Arc<NativeFs>)>,
}

impl ConfiguredShares {
    pub fn new(shares: &[ShareConfig]) -> Self {
        let shares = shares
            .iter()
            .map(|share| {
                if !share.path.is_dir() {
                    warn!("Share '{}' points at missing directory {:?}", share.name, share.path);
                }
                (share.name.clone(), Arc::new(NativeFs::new(share.path.clone())))
            })
            .collect();
        Self { shares }
    }
}

impl ShareBases for ConfiguredShares {
    fn resolve(&self, index: u32) -> Option<Arc<dyn FileSystem>> {
        let (_, fs) = self.shares.get(usize::try_from(index).ok()?)?;
        Some(fs.clone() as Arc<dyn FileSystem>)
    }

    fn names(&self) -> Vec<String> {
        self.shares.iter().map(|(name, _)| name.clone()).collect()
    }
}
