//! context_store - lookup of UE handlers by UE id, GUTI, IMSI or lower layer key

use super::identity::{EnbUeKey, Guti, Imsi};
use anyhow::{Result, anyhow, ensure};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUpdate {
    UeId(u32),
    Guti(Option<Guti>),
    Imsi(Imsi),
    EnbUeKey(Option<EnbUeKey>),
}

struct Entry<S> {
    sender: S,
    guti: Option<Guti>,
    imsi: Option<Imsi>,
    enb_ue_key: Option<EnbUeKey>,
}

/// Maps each UE id to a handle on the UE (in practice its handler's channel), with secondary
/// indexes kept in step with the keys each UE is known by.
#[derive(Clone)]
pub struct UeContextStore<S> {
    by_id: Arc<DashMap<u32, Entry<S>>>,
    by_guti: Arc<DashMap<Guti, u32>>,
    by_imsi: Arc<DashMap<Imsi, u32>>,
    by_enb_key: Arc<DashMap<EnbUeKey, u32>>,
}

impl<S: Clone> Default for UeContextStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone> UeContextStore<S> {
    pub fn new() -> Self {
        UeContextStore {
            by_id: Arc::new(DashMap::new()),
            by_guti: Arc::new(DashMap::new()),
            by_imsi: Arc::new(DashMap::new()),
            by_enb_key: Arc::new(DashMap::new()),
        }
    }

    pub fn contains(&self, ue_id: u32) -> bool {
        self.by_id.contains_key(&ue_id)
    }

    pub fn find(&self, ue_id: u32) -> Option<S> {
        self.by_id.get(&ue_id).map(|e| e.sender.clone())
    }

    pub fn find_by_guti(&self, guti: &Guti) -> Option<u32> {
        self.by_guti.get(guti).map(|x| *x)
    }

    pub fn find_by_imsi(&self, imsi: &str) -> Option<u32> {
        self.by_imsi.get(imsi).map(|x| *x)
    }

    pub fn find_by_enb_key(&self, key: &EnbUeKey) -> Option<u32> {
        self.by_enb_key.get(key).map(|x| *x)
    }

    pub fn enb_ue_key(&self, ue_id: u32) -> Option<EnbUeKey> {
        self.by_id.get(&ue_id).and_then(|e| e.enb_ue_key)
    }

    pub fn insert(&self, ue_id: u32, sender: S, enb_ue_key: Option<EnbUeKey>) -> Result<()> {
        ensure!(!self.by_id.contains_key(&ue_id), "UE {ue_id} already exists");
        if let Some(key) = enb_ue_key {
            self.by_enb_key.insert(key, ue_id);
        }
        self.by_id.insert(
            ue_id,
            Entry {
                sender,
                guti: None,
                imsi: None,
                enb_ue_key,
            },
        );
        Ok(())
    }

    /// Change one of the keys a UE is known by, keeping the indexes consistent.
    pub fn update_keys(&self, ue_id: u32, update: KeyUpdate) -> Result<()> {
        match update {
            KeyUpdate::UeId(new_id) => {
                if new_id == ue_id {
                    return Ok(());
                }
                ensure!(!self.by_id.contains_key(&new_id), "UE {new_id} already exists");
                let (_, entry) = self
                    .by_id
                    .remove(&ue_id)
                    .ok_or_else(|| anyhow!("UE {ue_id} not found"))?;
                if let Some(guti) = entry.guti {
                    self.by_guti.insert(guti, new_id);
                }
                if let Some(imsi) = &entry.imsi {
                    self.by_imsi.insert(imsi.clone(), new_id);
                }
                if let Some(key) = entry.enb_ue_key {
                    self.by_enb_key.insert(key, new_id);
                }
                self.by_id.insert(new_id, entry);
            }
            KeyUpdate::Guti(guti) => {
                let mut entry = self
                    .by_id
                    .get_mut(&ue_id)
                    .ok_or_else(|| anyhow!("UE {ue_id} not found"))?;
                if let Some(old) = entry.guti.take() {
                    self.by_guti.remove_if(&old, |_, id| *id == ue_id);
                }
                if let Some(guti) = guti {
                    self.by_guti.insert(guti, ue_id);
                }
                entry.guti = guti;
            }
            KeyUpdate::Imsi(imsi) => {
                let mut entry = self
                    .by_id
                    .get_mut(&ue_id)
                    .ok_or_else(|| anyhow!("UE {ue_id} not found"))?;
                if let Some(old) = entry.imsi.take() {
                    self.by_imsi.remove_if(&old, |_, id| *id == ue_id);
                }
                self.by_imsi.insert(imsi.clone(), ue_id);
                entry.imsi = Some(imsi);
            }
            KeyUpdate::EnbUeKey(key) => {
                let mut entry = self
                    .by_id
                    .get_mut(&ue_id)
                    .ok_or_else(|| anyhow!("UE {ue_id} not found"))?;
                if let Some(old) = entry.enb_ue_key.take() {
                    self.by_enb_key.remove_if(&old, |_, id| *id == ue_id);
                }
                if let Some(key) = key {
                    self.by_enb_key.insert(key, ue_id);
                }
                entry.enb_ue_key = key;
            }
        }
        Ok(())
    }

    pub fn remove(&self, ue_id: u32) -> Option<S> {
        let (_, entry) = self.by_id.remove(&ue_id)?;
        if let Some(guti) = entry.guti {
            self.by_guti.remove_if(&guti, |_, id| *id == ue_id);
        }
        if let Some(imsi) = entry.imsi {
            self.by_imsi.remove_if(&imsi, |_, id| *id == ue_id);
        }
        if let Some(key) = entry.enb_ue_key {
            self.by_enb_key.remove_if(&key, |_, id| *id == ue_id);
        }
        Some(entry.sender)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
