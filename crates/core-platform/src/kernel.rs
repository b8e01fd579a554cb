//! Compute kernel registry.
//!
//! A kernel receives the resolved input parameter values, a slot per output
//! parameter to fill (configuration actors only), and the input/output data
//! buffers of the firing. Send/receive kernels of memory buses are ordinary
//! registry entries referenced by the bus description.

/// User-supplied compute routine.
pub type Kernel =
    Box<dyn Fn(&[i64], &mut [i64], &[&[u8]], &mut [&mut [u8]]) + Send + Sync + 'static>;

#[derive(Default)]
pub struct KernelRegistry {
    kernels: Vec<Kernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel and return its index, referenced from `RtInfo` and
    /// bus descriptions.
    pub fn register(&mut self, kernel: Kernel) -> u32 {
        self.kernels.push(kernel);
        (self.kernels.len() - 1) as u32
    }

    pub fn get(&self, ix: u32) -> Option<&Kernel> {
        self.kernels.get(ix as usize)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("kernels", &self.kernels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_yields_dense_indices() {
        let mut registry = KernelRegistry::new();
        let a = registry.register(Box::new(|_, _, _, _| {}));
        let b = registry.register(Box::new(|_, _, _, _| {}));
        assert_eq!((a, b), (0, 1));
        assert!(registry.get(1).is_some());
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn kernel_sees_params_and_buffers() {
        let mut registry = KernelRegistry::new();
        let ix = registry.register(Box::new(|params, out_params, inputs, outputs| {
            out_params[0] = params[0] * 2;
            outputs[0].copy_from_slice(inputs[0]);
        }));
        let kernel = registry.get(ix).unwrap();
        let input = [1u8, 2, 3];
        let mut output = vec![0u8; 3];
        let mut out_params = [0i64];
        let mut out_ref: Vec<&mut [u8]> = vec![output.as_mut_slice()];
        kernel(&[21], &mut out_params, &[&input], &mut out_ref);
        assert_eq!(out_params[0], 42);
        assert_eq!(output, vec![1, 2, 3]);
    }
}
