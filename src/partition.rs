//! Spatial partitioning: keys, chunks, the chunk registry and partitions.
//!
//! A partition maps a world position to at most one spatial chunk; every
//! chunk owns its own entity manager. Chunks are addressed by a stable
//! [`SpatialChunkKey`] through the [`ChunkRegistry`], so entities can be
//! migrated by key even when a partition's backing storage reorganises.

use std::sync::{Arc, Weak};

use glam::{Vec3, Vec4};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::manager::EntityManager;

/// Identifier of one level, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LevelId(pub u32);

/// Stable identity of a partition cell: `(level, code, tree_level)`.
/// `code == 0` marks an unassigned key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpatialChunkKey {
    pub level: LevelId,
    pub code: u64,
    pub tree_level: u8,
}

impl SpatialChunkKey {
    pub fn is_valid(&self) -> bool {
        self.code != 0
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box covering all of space.
    pub fn everything() -> Self {
        Self {
            min: Vec3::splat(f32::NEG_INFINITY),
            max: Vec3::splat(f32::INFINITY),
        }
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }
}

/// View frustum as six inward-facing planes (`xyz` normal, `w` distance).
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_planes(planes: [Vec4; 6]) -> Self {
        Self { planes }
    }

    /// Frustum that accepts everything.
    pub fn everything() -> Self {
        Self {
            planes: [Vec4::new(0.0, 0.0, 0.0, 1.0); 6],
        }
    }

    /// Conservative AABB test via the positive vertex of each plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let normal = plane.truncate();
            let p = Vec3::new(
                if normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            if normal.dot(p) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

/// Behaviour for positions outside the partition bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfBoundsPolicy {
    Reject,
    ClampToEdge,
}

/// One partition cell: a bounding box, a stable key and an entity manager.
pub struct SpatialChunk {
    aabb: Aabb,
    key: RwLock<SpatialChunkKey>,
    manager: EntityManager,
}

impl SpatialChunk {
    pub fn new(aabb: Aabb) -> Self {
        Self {
            aabb,
            key: RwLock::new(SpatialChunkKey::default()),
            manager: EntityManager::new(),
        }
    }

    pub fn entity_manager(&self) -> &EntityManager {
        &self.manager
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    /// Key assigned when the partition registered this chunk.
    pub fn key(&self) -> SpatialChunkKey {
        *self.key.read()
    }

    pub(crate) fn set_key(&self, key: SpatialChunkKey) {
        *self.key.write() = key;
    }
}

/// Key-to-owner resolution, independent of partition pointer stability.
///
/// Owners are held weakly: when a partition drops or rebuilds a chunk, stale
/// keys stop resolving instead of dangling, and callers re-resolve each
/// frame.
#[derive(Default)]
pub struct ChunkRegistry {
    map: RwLock<FxHashMap<SpatialChunkKey, Weak<SpatialChunk>>>,
}

impl ChunkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `chunk` and stamp the key onto the chunk.
    pub fn register(&self, key: SpatialChunkKey, chunk: &Arc<SpatialChunk>) {
        chunk.set_key(key);
        self.map.write().insert(key, Arc::downgrade(chunk));
    }

    pub fn unregister(&self, key: SpatialChunkKey) {
        self.map.write().remove(&key);
    }

    /// Resolve a key to its chunk. May fail after a partition reorganises.
    pub fn resolve_chunk(&self, key: SpatialChunkKey) -> Option<Arc<SpatialChunk>> {
        self.map.read().get(&key)?.upgrade()
    }

    /// Resolve a key to the chunk owning the entity manager; the source of
    /// truth for entity ownership.
    pub fn resolve_owner_em(&self, key: SpatialChunkKey) -> Option<Arc<SpatialChunk>> {
        self.resolve_chunk(key)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

/// Spatial lookup consumed by levels, movers and culling systems.
pub trait Partition: Send + Sync + 'static {
    /// Whether chunk pointers stay valid across frames. Cross-chunk movement
    /// picks pointer-equality fast paths only when this holds.
    const STABLE_CHUNK_PTRS: bool = false;

    /// Cell owning `pos` under `policy`.
    fn chunk_at(
        &self,
        pos: Vec3,
        registry: &ChunkRegistry,
        level: LevelId,
        policy: OutOfBoundsPolicy,
    ) -> Option<Arc<SpatialChunk>>;

    /// Register every chunk's key with the registry. Called on level
    /// construction.
    fn register_all_chunks(&self, registry: &ChunkRegistry, level: LevelId);

    /// Manager for entities without a spatial anchor.
    fn global_manager(&self) -> &EntityManager;

    /// Chunks intersecting the frustum.
    fn cull_chunks(&self, frustum: &Frustum) -> Vec<Arc<SpatialChunk>>;

    /// Total entities across all cells and the global manager.
    fn entity_count(&self) -> usize;

    /// Per-frame partition maintenance hook.
    fn update(&self, _dt: f64) {}
}

/// Fixed W x H grid of square cells over the XY plane, plus one global
/// off-grid chunk. Chunk pointers are stable for the partition's lifetime.
pub struct GridPartition {
    width: u32,
    height: u32,
    cell_size: f32,
    cells: Vec<Arc<SpatialChunk>>,
    global: Arc<SpatialChunk>,
}

impl GridPartition {
    pub fn new(width: u32, height: u32, cell_size: f32) -> Self {
        assert!(width > 0 && height > 0 && cell_size > 0.0);
        let mut cells = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let min = Vec3::new(x as f32 * cell_size, y as f32 * cell_size, f32::NEG_INFINITY);
                let max = Vec3::new(
                    (x + 1) as f32 * cell_size,
                    (y + 1) as f32 * cell_size,
                    f32::INFINITY,
                );
                cells.push(Arc::new(SpatialChunk::new(Aabb::new(min, max))));
            }
        }
        Self {
            width,
            height,
            cell_size,
            cells,
            global: Arc::new(SpatialChunk::new(Aabb::everything())),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    fn cell(&self, x: u32, y: u32) -> &Arc<SpatialChunk> {
        &self.cells[(y * self.width + x) as usize]
    }
}

impl Partition for GridPartition {
    const STABLE_CHUNK_PTRS: bool = true;

    fn chunk_at(
        &self,
        pos: Vec3,
        _registry: &ChunkRegistry,
        _level: LevelId,
        policy: OutOfBoundsPolicy,
    ) -> Option<Arc<SpatialChunk>> {
        let x = (pos.x / self.cell_size).floor() as i64;
        let y = (pos.y / self.cell_size).floor() as i64;

        match policy {
            OutOfBoundsPolicy::ClampToEdge => {
                let x = x.clamp(0, i64::from(self.width) - 1) as u32;
                let y = y.clamp(0, i64::from(self.height) - 1) as u32;
                Some(Arc::clone(self.cell(x, y)))
            }
            OutOfBoundsPolicy::Reject => {
                if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
                    return None;
                }
                Some(Arc::clone(self.cell(x as u32, y as u32)))
            }
        }
    }

    fn register_all_chunks(&self, registry: &ChunkRegistry, level: LevelId) {
        for (i, chunk) in self.cells.iter().enumerate() {
            let key = SpatialChunkKey {
                level,
                code: i as u64 + 1,
                tree_level: 0,
            };
            registry.register(key, chunk);
        }
        let global_key = SpatialChunkKey {
            level,
            code: u64::from(self.width) * u64::from(self.height) + 1,
            tree_level: 0,
        };
        registry.register(global_key, &self.global);
    }

    fn global_manager(&self) -> &EntityManager {
        self.global.entity_manager()
    }

    fn cull_chunks(&self, frustum: &Frustum) -> Vec<Arc<SpatialChunk>> {
        self.cells
            .iter()
            .filter(|c| frustum.intersects_aabb(&c.aabb()))
            .cloned()
            .collect()
    }

    fn entity_count(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.entity_manager().entity_count())
            .sum::<usize>()
            + self.global.entity_manager().entity_count()
    }
}

/// Partition without spatial division: one chunk owns everything.
pub struct VoidPartition {
    chunk: Arc<SpatialChunk>,
}

impl VoidPartition {
    pub fn new() -> Self {
        Self {
            chunk: Arc::new(SpatialChunk::new(Aabb::everything())),
        }
    }
}

impl Default for VoidPartition {
    fn default() -> Self {
        Self::new()
    }
}

impl Partition for VoidPartition {
    const STABLE_CHUNK_PTRS: bool = true;

    fn chunk_at(
        &self,
        _pos: Vec3,
        _registry: &ChunkRegistry,
        _level: LevelId,
        _policy: OutOfBoundsPolicy,
    ) -> Option<Arc<SpatialChunk>> {
        Some(Arc::clone(&self.chunk))
    }

    fn register_all_chunks(&self, registry: &ChunkRegistry, level: LevelId) {
        registry.register(
            SpatialChunkKey {
                level,
                code: 1,
                tree_level: 0,
            },
            &self.chunk,
        );
    }

    fn global_manager(&self) -> &EntityManager {
        self.chunk.entity_manager()
    }

    fn cull_chunks(&self, _frustum: &Frustum) -> Vec<Arc<SpatialChunk>> {
        vec![Arc::clone(&self.chunk)]
    }

    fn entity_count(&self) -> usize {
        self.chunk.entity_manager().entity_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_lookup_and_policies() {
        let grid = GridPartition::new(4, 4, 10.0);
        let reg = ChunkRegistry::new();
        let level = LevelId(1);
        grid.register_all_chunks(&reg, level);
        assert_eq!(reg.len(), 17); // 16 cells + global

        let inside = grid
            .chunk_at(Vec3::new(15.0, 35.0, 0.0), &reg, level, OutOfBoundsPolicy::Reject)
            .unwrap();
        assert_eq!(inside.key().code, (3 * 4 + 1) as u64 + 1);

        assert!(grid
            .chunk_at(Vec3::new(-5.0, 0.0, 0.0), &reg, level, OutOfBoundsPolicy::Reject)
            .is_none());

        let clamped = grid
            .chunk_at(
                Vec3::new(-5.0, 999.0, 0.0),
                &reg,
                level,
                OutOfBoundsPolicy::ClampToEdge,
            )
            .unwrap();
        assert_eq!(clamped.key().code, (3 * 4) as u64 + 1);
    }

    #[test]
    fn registry_resolves_until_chunk_drops() {
        let reg = ChunkRegistry::new();
        let key = SpatialChunkKey {
            level: LevelId(2),
            code: 7,
            tree_level: 0,
        };
        let chunk = Arc::new(SpatialChunk::new(Aabb::everything()));
        reg.register(key, &chunk);

        assert_eq!(chunk.key(), key);
        assert!(reg.resolve_chunk(key).is_some());
        assert!(Arc::ptr_eq(&reg.resolve_owner_em(key).unwrap(), &chunk));

        drop(chunk);
        assert!(reg.resolve_chunk(key).is_none());
    }

    #[test]
    fn frustum_everything_accepts_all_cells() {
        let grid = GridPartition::new(3, 2, 8.0);
        let culled = grid.cull_chunks(&Frustum::everything());
        assert_eq!(culled.len(), 6);
    }

    #[test]
    fn frustum_plane_rejects_boxes_behind_it() {
        // Single meaningful plane: x >= 10.
        let mut planes = [Vec4::new(0.0, 0.0, 0.0, 1.0); 6];
        planes[0] = Vec4::new(1.0, 0.0, 0.0, -10.0);
        let frustum = Frustum::from_planes(planes);

        let near = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(5.0, 5.0, 5.0));
        let far = Aabb::new(Vec3::new(12.0, 0.0, 0.0), Vec3::new(20.0, 5.0, 5.0));
        assert!(!frustum.intersects_aabb(&near));
        assert!(frustum.intersects_aabb(&far));
    }

    #[test]
    fn void_partition_always_resolves() {
        let void = VoidPartition::new();
        let reg = ChunkRegistry::new();
        void.register_all_chunks(&reg, LevelId(3));
        let chunk = void
            .chunk_at(
                Vec3::new(1e9, -1e9, 0.0),
                &reg,
                LevelId(3),
                OutOfBoundsPolicy::Reject,
            )
            .unwrap();
        assert!(Arc::ptr_eq(&chunk, &reg.resolve_chunk(chunk.key()).unwrap()));
    }
}
