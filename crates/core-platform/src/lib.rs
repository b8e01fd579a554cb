//! Static platform description: clusters of processing elements, per-cluster
//! memory interfaces and inter-cluster memory buses.
//!
//! Exactly one PE in the system is the GRT (the scheduling agent); every
//! enabled PE hosts one LRT runner. PE virtual indices are dense across the
//! whole platform and double as LRT indices in the runner protocol.

use thiserror::Error;

mod kernel;
mod memory;

pub use kernel::{Kernel, KernelRegistry};
pub use memory::MemoryPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub u32);

impl PeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ClusterId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform declares no GRT processing element")]
    MissingGrt,
    #[error("platform declares {0} GRT processing elements, expected one")]
    MultipleGrt(usize),
    #[error("no memory bus between cluster {0} and cluster {1}")]
    MissingBus(u32, u32),
}

#[derive(Debug, Clone)]
pub struct Pe {
    pub virtual_ix: PeId,
    pub pe_type: u32,
    pub enabled: bool,
    pub is_grt: bool,
    pub cluster: ClusterId,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub ix: ClusterId,
    pub pes: Vec<PeId>,
    /// Virtual address space available to the FIFO allocator, in bytes.
    pub memory_size: u64,
}

/// Directed inter-cluster link. Speeds are bytes per cycle; the kernels are
/// the registered send/receive routines driven by sync tasks.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBus {
    pub read_speed: u64,
    pub write_speed: u64,
    pub send_kernel: u32,
    pub recv_kernel: u32,
}

#[derive(Debug, Default)]
pub struct Platform {
    pes: Vec<Pe>,
    clusters: Vec<Cluster>,
    /// Dense matrix, row = source cluster, column = destination cluster.
    buses: Vec<Option<MemoryBus>>,
}

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cluster(&mut self, memory_size: u64) -> ClusterId {
        let ix = ClusterId(self.clusters.len() as u32);
        self.clusters.push(Cluster {
            ix,
            pes: Vec::new(),
            memory_size,
        });
        self.grow_bus_matrix();
        ix
    }

    pub fn add_pe(&mut self, cluster: ClusterId, pe_type: u32, enabled: bool) -> PeId {
        let ix = PeId(self.pes.len() as u32);
        self.pes.push(Pe {
            virtual_ix: ix,
            pe_type,
            enabled,
            is_grt: false,
            cluster,
        });
        self.clusters[cluster.index()].pes.push(ix);
        ix
    }

    pub fn set_grt(&mut self, pe: PeId) {
        for p in &mut self.pes {
            p.is_grt = false;
        }
        self.pes[pe.index()].is_grt = true;
    }

    pub fn set_bus(&mut self, src: ClusterId, dst: ClusterId, bus: MemoryBus) {
        let n = self.clusters.len();
        self.buses[src.index() * n + dst.index()] = Some(bus);
    }

    fn grow_bus_matrix(&mut self) {
        let n = self.clusters.len();
        let old_n = n - 1;
        let mut matrix = vec![None; n * n];
        for i in 0..old_n {
            for j in 0..old_n {
                matrix[i * n + j] = self.buses[i * old_n + j];
            }
        }
        self.buses = matrix;
    }

    /// Structural check performed once at engine start.
    pub fn validate(&self) -> Result<(), PlatformError> {
        match self.pes.iter().filter(|p| p.is_grt).count() {
            0 => Err(PlatformError::MissingGrt),
            1 => Ok(()),
            n => Err(PlatformError::MultipleGrt(n)),
        }
    }

    pub fn grt(&self) -> Result<&Pe, PlatformError> {
        self.pes
            .iter()
            .find(|p| p.is_grt)
            .ok_or(PlatformError::MissingGrt)
    }

    pub fn pe(&self, id: PeId) -> &Pe {
        &self.pes[id.index()]
    }

    pub fn pes(&self) -> &[Pe] {
        &self.pes
    }

    pub fn cluster(&self, id: ClusterId) -> &Cluster {
        &self.clusters[id.index()]
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// One LRT runner per PE; the LRT index is the PE virtual index.
    pub fn lrt_count(&self) -> usize {
        self.pes.len()
    }

    pub fn bus(&self, src: ClusterId, dst: ClusterId) -> Result<MemoryBus, PlatformError> {
        let n = self.clusters.len();
        self.buses[src.index() * n + dst.index()]
            .ok_or(PlatformError::MissingBus(src.0, dst.0))
    }

    /// Cost in cycles of moving `size` bytes produced on `src` toward a
    /// consumer on `dst`: zero inside a cluster, otherwise size over the
    /// write speed of the bus between the clusters.
    pub fn transfer_cost(&self, src: PeId, dst: PeId, size: u64) -> u64 {
        let (cs, cd) = (self.pe(src).cluster, self.pe(dst).cluster);
        if cs == cd {
            return 0;
        }
        match self.bus(cs, cd) {
            Ok(bus) if bus.write_speed > 0 => size.div_ceil(bus.write_speed),
            _ => u64::MAX / 2,
        }
    }

    /// True when the cluster hosts at least one enabled PE whose type is in
    /// the mask.
    pub fn cluster_supports(&self, cluster: ClusterId, pe_type_mask: u64) -> bool {
        self.clusters[cluster.index()].pes.iter().any(|pe| {
            let pe = self.pe(*pe);
            pe.enabled && pe.pe_type < u64::BITS && (pe_type_mask >> pe.pe_type) & 1 == 1
        })
    }
}
