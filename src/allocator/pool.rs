//! Physical texture pool.
//!
//! Textures live in an arena of slots addressed by [`PhysicalTextureId`]
//! (slot index + generation). Releasing a texture does not destroy it: it is
//! cached under its descriptor and handed out again to the next request with
//! an identical descriptor. [`TexturePool::evict_unused`] destroys whatever is
//! cached.
//!
//! The pool is shared by every workspace of a compositor as
//! `Arc<Mutex<TexturePool>>` and is only locked while instantiating or
//! tearing down workspaces.

use std::collections::{HashMap, VecDeque};

use crate::backend::{BackendResult, RenderDevice, TextureHandle};
use crate::types::TextureDescriptor;

/// Generation-checked reference to a pooled texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalTextureId {
    index: u32,
    generation: u32,
}

impl PhysicalTextureId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// A GPU texture owned by the pool
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalTexture {
    pub descriptor: TextureDescriptor,
    pub handle: TextureHandle,
    pub label: String,
}

#[derive(Debug)]
enum SlotState {
    Vacant,
    InUse(PhysicalTexture),
    Cached(PhysicalTexture),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
}

/// Counters reported by [`TexturePool::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub cached: usize,
    pub created: u64,
    pub reused: u64,
    pub destroyed: u64,
}

#[derive(Debug)]
pub struct TexturePool {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    /// Cached slot indices per descriptor, oldest first
    cache: HashMap<TextureDescriptor, VecDeque<u32>>,
    /// Every cached slot, oldest first
    cache_order: VecDeque<u32>,
    cache_capacity: usize,
    stats: PoolStats,
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new(64)
    }
}

impl TexturePool {
    /// Create a pool keeping at most `cache_capacity` released textures alive.
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
            cache_capacity,
            stats: PoolStats::default(),
        }
    }

    /// Get a texture matching `descriptor`, reusing a cached one if possible.
    pub fn acquire(
        &mut self,
        device: &dyn RenderDevice,
        descriptor: &TextureDescriptor,
        label: &str,
    ) -> BackendResult<PhysicalTextureId> {
        if let Some(index) = self.cache.get_mut(descriptor).and_then(|q| q.pop_front()) {
            self.cache_order.retain(|&i| i != index);
            let slot = &mut self.slots[index as usize];
            let state = std::mem::replace(&mut slot.state, SlotState::Vacant);
            if let SlotState::Cached(mut texture) = state {
                log::trace!("Pool: reusing '{}' for '{}'", texture.label, label);
                texture.label = label.to_string();
                slot.state = SlotState::InUse(texture);
                self.stats.reused += 1;
                return Ok(PhysicalTextureId {
                    index,
                    generation: slot.generation,
                });
            }
            // Cache index pointed at a non-cached slot; restore and fall through
            slot.state = state;
        }

        let handle = device.create_texture(descriptor, label)?;
        self.stats.created += 1;
        let texture = PhysicalTexture {
            descriptor: descriptor.clone(),
            handle,
            label: label.to_string(),
        };

        let index = match self.vacant.pop() {
            Some(index) => {
                self.slots[index as usize].state = SlotState::InUse(texture);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    state: SlotState::InUse(texture),
                });
                (self.slots.len() - 1) as u32
            }
        };
        Ok(PhysicalTextureId {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    /// Return a texture to the cache. Stale ids are ignored.
    pub fn release(&mut self, device: &dyn RenderDevice, id: PhysicalTextureId) -> bool {
        let Some(texture) = self.take_in_use(id) else {
            log::warn!("Pool: releasing stale texture id {:?}", id);
            return false;
        };
        let slot = &mut self.slots[id.index as usize];
        self.cache
            .entry(texture.descriptor.clone())
            .or_default()
            .push_back(id.index);
        slot.state = SlotState::Cached(texture);
        self.cache_order.push_back(id.index);

        while self.cache_order.len() > self.cache_capacity {
            if let Some(oldest) = self.cache_order.pop_front() {
                self.destroy_cached(device, oldest);
            }
        }
        true
    }

    /// Destroy a texture immediately instead of caching it.
    pub fn discard(&mut self, device: &dyn RenderDevice, id: PhysicalTextureId) -> bool {
        match self.take_in_use(id) {
            Some(texture) => {
                device.destroy_texture(texture.handle);
                self.stats.destroyed += 1;
                self.vacant.push(id.index);
                true
            }
            None => false,
        }
    }

    /// Destroy every cached texture. Returns how many were destroyed.
    pub fn evict_unused(&mut self, device: &dyn RenderDevice) -> usize {
        let cached: Vec<u32> = self.cache_order.drain(..).collect();
        for &index in &cached {
            self.destroy_cached(device, index);
        }
        if !cached.is_empty() {
            log::debug!("Pool: evicted {} unused texture(s)", cached.len());
        }
        cached.len()
    }

    pub fn get(&self, id: PhysicalTextureId) -> Option<&PhysicalTexture> {
        let slot = self.slots.get(id.index as usize)?;
        match &slot.state {
            SlotState::InUse(texture) if slot.generation == id.generation => Some(texture),
            _ => None,
        }
    }

    pub fn handle(&self, id: PhysicalTextureId) -> Option<TextureHandle> {
        self.get(id).map(|t| t.handle)
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = self.stats;
        stats.in_use = self
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::InUse(_)))
            .count();
        stats.cached = self.cache_order.len();
        stats
    }

    /// Move an in-use texture out of its slot and invalidate `id`.
    fn take_in_use(&mut self, id: PhysicalTextureId) -> Option<PhysicalTexture> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || !matches!(slot.state, SlotState::InUse(_)) {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        match std::mem::replace(&mut slot.state, SlotState::Vacant) {
            SlotState::InUse(texture) => Some(texture),
            _ => None,
        }
    }

    fn destroy_cached(&mut self, device: &dyn RenderDevice, index: u32) {
        let slot = &mut self.slots[index as usize];
        if let SlotState::Cached(texture) = std::mem::replace(&mut slot.state, SlotState::Vacant) {
            if let Some(queue) = self.cache.get_mut(&texture.descriptor) {
                queue.retain(|&i| i != index);
                if queue.is_empty() {
                    self.cache.remove(&texture.descriptor);
                }
            }
            device.destroy_texture(texture.handle);
            self.stats.destroyed += 1;
            self.vacant.push(index);
        }
    }
}
