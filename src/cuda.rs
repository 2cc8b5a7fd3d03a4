//! CUDA compute backend.
//!
//! Same two-stage step as the wgpu backend, expressed as two NVRTC-compiled
//! kernels launched on the default stream. Stream order is the stage
//! barrier: the transition launch cannot begin until the halo launch has
//! retired, and step k+1 cannot begin until step k's writes are complete.
//! The role swap exchanges the two device slices.
//!
//! Build with: cargo build --release --features cuda
//! Requires an NVIDIA GPU and the CUDA toolkit.

#![cfg(feature = "cuda")]

use crate::grid::Grid;
use cudarc::driver::*;
use std::error::Error;
use std::sync::Arc;

/// The halo kernel mirrors `Grid::sync_boundary`; the step kernel carries
/// the same 10-entry rule table as the host `RULE` constant.
const ANNEAL_CUDA_KERNEL: &str = r#"
__device__ const unsigned char RULE[10] = {0, 0, 0, 0, 1, 0, 1, 1, 1, 1};

extern "C" __global__ void sync_halo(
    unsigned char* grid,
    int width,
    int lines
) {
    int stride = width + 2;
    int i = blockIdx.x * blockDim.x + threadIdx.x;

    if (i < width) {
        int col = i + 1;
        grid[col] = grid[lines * stride + col];
        grid[(lines + 1) * stride + col] = grid[stride + col];
    }
    if (i < lines) {
        int row = i + 1;
        grid[row * stride] = grid[row * stride + width];
        grid[row * stride + width + 1] = grid[row * stride + 1];
    }
    if (i == 0) {
        grid[0] = grid[lines * stride + width];
        grid[width + 1] = grid[lines * stride + 1];
        grid[(lines + 1) * stride] = grid[stride + width];
        grid[(lines + 1) * stride + width + 1] = grid[stride + 1];
    }
}

extern "C" __global__ void anneal_step(
    const unsigned char* src,
    unsigned char* dst,
    int width,
    int lines
) {
    int col = blockIdx.x * blockDim.x + threadIdx.x + 1;
    int row = blockIdx.y * blockDim.y + threadIdx.y + 1;
    if (col > width || row > lines) return;

    int stride = width + 2;
    int here = row * stride + col;
    int sum = src[here - stride - 1] + src[here - stride] + src[here - stride + 1]
            + src[here - 1]          + src[here]          + src[here + 1]
            + src[here + stride - 1] + src[here + stride] + src[here + stride + 1];
    dst[here] = RULE[sum];
}
"#;

pub struct CudaSimulation {
    device: Arc<CudaDevice>,
    from_gpu: CudaSlice<u8>,
    to_gpu: CudaSlice<u8>,
    halo_kernel: CudaFunction,
    step_kernel: CudaFunction,
    width: usize,
    lines: usize,
}

impl CudaSimulation {
    /// Compile the kernels and allocate the device grid pair for the given
    /// interior dimensions. No grid data is transferred here; `run` does
    /// the upload. Fatal on any driver, compile, or allocation failure.
    pub fn new(width: usize, lines: usize) -> Result<Self, Box<dyn Error>> {
        let device = CudaDevice::new(0)
            .map_err(|e| format!("device init: {}", e))?;

        let ptx = cudarc::nvrtc::compile_ptx(ANNEAL_CUDA_KERNEL)
            .map_err(|e| format!("kernel compile: {}", e))?;
        device
            .load_ptx(ptx, "anneal", &["sync_halo", "anneal_step"])
            .map_err(|e| format!("kernel load: {}", e))?;
        let halo_kernel = device
            .get_func("anneal", "sync_halo")
            .ok_or("kernel load: sync_halo missing")?;
        let step_kernel = device
            .get_func("anneal", "anneal_step")
            .ok_or("kernel load: anneal_step missing")?;

        let cell_count = (lines + 2) * (width + 2);
        let from_gpu = device
            .alloc_zeros::<u8>(cell_count)
            .map_err(|e| format!("device alloc: {}", e))?;
        let to_gpu = device
            .alloc_zeros::<u8>(cell_count)
            .map_err(|e| format!("device alloc: {}", e))?;

        Ok(Self {
            device,
            from_gpu,
            to_gpu,
            halo_kernel,
            step_kernel,
            width,
            lines,
        })
    }

    /// Upload the initial grid, run exactly `iterations` steps, then
    /// download the source slice.
    pub fn run(mut self, initial: &Grid, iterations: usize) -> Result<Grid, Box<dyn Error>> {
        assert_eq!(
            (initial.width(), initial.lines()),
            (self.width, self.lines),
            "grid dimensions must match the device buffers"
        );
        self.device
            .htod_sync_copy_into(initial.raw(), &mut self.from_gpu)
            .map_err(|e| format!("upload: {}", e))?;

        let span = self.width.max(self.lines) as u32;
        let halo_cfg = LaunchConfig {
            grid_dim: (span.div_ceil(256).max(1), 1, 1),
            block_dim: (256, 1, 1),
            shared_mem_bytes: 0,
        };
        let step_cfg = LaunchConfig {
            grid_dim: (
                (self.width as u32).div_ceil(16),
                (self.lines as u32).div_ceil(16),
                1,
            ),
            block_dim: (16, 16, 1),
            shared_mem_bytes: 0,
        };
        let width = self.width as i32;
        let lines = self.lines as i32;

        for step in 0..iterations {
            unsafe {
                self.halo_kernel
                    .clone()
                    .launch(halo_cfg, (&mut self.from_gpu, width, lines))
                    .map_err(|e| format!("sync_halo launch (step {}): {}", step, e))?;
                self.step_kernel
                    .clone()
                    .launch(step_cfg, (&self.from_gpu, &mut self.to_gpu, width, lines))
                    .map_err(|e| format!("anneal_step launch (step {}): {}", step, e))?;
            }
            std::mem::swap(&mut self.from_gpu, &mut self.to_gpu);
        }

        self.device
            .synchronize()
            .map_err(|e| format!("device sync: {}", e))?;
        let raw = self
            .device
            .dtoh_sync_copy(&self.from_gpu)
            .map_err(|e| format!("download: {}", e))?;
        Ok(Grid::from_raw(self.width, self.lines, raw))
    }
}

/// Check if CUDA is available without committing to it.
pub fn cuda_available() -> bool {
    CudaDevice::new(0).is_ok()
}
