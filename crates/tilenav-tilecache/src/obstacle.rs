//! Temporary obstacles and the salted registry that owns them

use std::fmt;

use tilenav_common::{Error, Result};
use tilenav_recast::ConvexVolume;

/// Footprint, height range and area id of a temporary obstacle
///
/// Built with [`ConvexVolume::polygon`], [`ConvexVolume::cylinder`],
/// [`ConvexVolume::box_aabb`] or [`ConvexVolume::oriented_box`].
pub type ObstacleVolume = ConvexVolume;

/// Reference to a registered obstacle, packing `salt << 16 | slot`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ObstacleHandle(u32);

impl ObstacleHandle {
    fn new(salt: u16, slot: u16) -> Self {
        Self(((salt as u32) << 16) | slot as u32)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn salt(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn slot(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl fmt::Display for ObstacleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A registered obstacle
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Obstacle {
    pub handle: ObstacleHandle,
    pub volume: ObstacleVolume,
    /// Insertion order; later obstacles override earlier ones
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
struct ObstacleSlot {
    salt: u16,
    obstacle: Option<Obstacle>,
}

/// Arena of obstacles addressed by salted handles
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ObstacleRegistry {
    slots: Vec<ObstacleSlot>,
    free: Vec<u16>,
    next_sequence: u64,
    max_obstacles: usize,
    active: usize,
}

impl ObstacleRegistry {
    pub fn new(max_obstacles: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next_sequence: 0,
            max_obstacles,
            active: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn max_obstacles(&self) -> usize {
        self.max_obstacles
    }

    /// Validates and registers a volume
    pub fn insert(&mut self, volume: ObstacleVolume) -> Result<ObstacleHandle> {
        volume.validate()?;
        if self.active >= self.max_obstacles {
            return Err(Error::ObstacleLimit(self.max_obstacles));
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = u16::try_from(self.slots.len())
                    .map_err(|_| Error::ObstacleLimit(self.slots.len()))?;
                self.slots.push(ObstacleSlot {
                    salt: 1,
                    obstacle: None,
                });
                slot
            }
        };

        let entry = &mut self.slots[slot as usize];
        let handle = ObstacleHandle::new(entry.salt, slot);
        entry.obstacle = Some(Obstacle {
            handle,
            volume,
            sequence: self.next_sequence,
        });
        self.next_sequence += 1;
        self.active += 1;
        Ok(handle)
    }

    /// Unregisters an obstacle; the handle goes stale
    pub fn remove(&mut self, handle: ObstacleHandle) -> Result<Obstacle> {
        let slot = handle.slot();
        let entry = self
            .slots
            .get_mut(slot as usize)
            .filter(|e| e.salt == handle.salt() && e.obstacle.is_some())
            .ok_or(Error::UnknownHandle(handle.raw()))?;

        let obstacle = entry.obstacle.take().ok_or(Error::UnknownHandle(handle.raw()))?;
        entry.salt = match entry.salt.wrapping_add(1) {
            0 => 1,
            salt => salt,
        };
        self.free.push(slot);
        self.active -= 1;
        Ok(obstacle)
    }

    pub fn get(&self, handle: ObstacleHandle) -> Option<&Obstacle> {
        self.slots
            .get(handle.slot() as usize)
            .filter(|e| e.salt == handle.salt())
            .and_then(|e| e.obstacle.as_ref())
    }

    /// Checks the bookkeeping of a deserialized registry
    ///
    /// The active count, the free list and every stored handle must agree
    /// with the occupied slots; a mismatch fails with [`Error::Snapshot`].
    pub fn validate(&self) -> Result<()> {
        let corrupt = |reason: String| Err(Error::Snapshot(format!("obstacle registry: {reason}")));

        let occupied = self.slots.iter().filter(|e| e.obstacle.is_some()).count();
        if occupied != self.active {
            return corrupt(format!(
                "{} active obstacles recorded, {occupied} stored",
                self.active
            ));
        }
        if self.active > self.max_obstacles {
            return corrupt(format!(
                "{} active obstacles exceed the limit of {}",
                self.active, self.max_obstacles
            ));
        }

        let mut in_free = vec![false; self.slots.len()];
        for &slot in &self.free {
            match self.slots.get(slot as usize) {
                Some(entry) if entry.obstacle.is_none() && !in_free[slot as usize] => {
                    in_free[slot as usize] = true;
                }
                _ => return corrupt(format!("bad free slot {slot}")),
            }
        }

        for (slot, entry) in self.slots.iter().enumerate() {
            if entry.salt == 0 {
                return corrupt(format!("slot {slot} has a zero salt"));
            }
            match &entry.obstacle {
                Some(obstacle) => {
                    if obstacle.handle != ObstacleHandle::new(entry.salt, slot as u16) {
                        return corrupt(format!("slot {slot} holds handle {}", obstacle.handle));
                    }
                    if obstacle.sequence >= self.next_sequence {
                        return corrupt(format!("slot {slot} has a future sequence"));
                    }
                    obstacle.volume.validate()?;
                }
                None if !in_free[slot] => {
                    return corrupt(format!("empty slot {slot} is not on the free list"));
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Active obstacles in insertion order
    pub fn ordered(&self) -> Vec<&Obstacle> {
        let mut obstacles: Vec<&Obstacle> =
            self.slots.iter().filter_map(|e| e.obstacle.as_ref()).collect();
        obstacles.sort_by_key(|o| o.sequence);
        obstacles
    }
}
