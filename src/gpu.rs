//! wgpu compute backend.
//!
//! Device-resident double buffering: the grid pair lives in two storage
//! buffers, and each step is two compute dispatches on the same encoder.
//! The first dispatch fills the halo of the source buffer in place; the
//! second reads the synced source and writes every interior cell of the
//! destination. wgpu orders the dispatches through the storage-buffer
//! hazard between them, which is exactly the stage barrier the step needs:
//! no transition invocation can observe a half-written halo. The role swap
//! is a bind-group toggle, not a copy.
//!
//! Cells are one u32 each on the device (WGSL storage arrays have no byte
//! type); the host converts to and from the byte grid at the transfer
//! boundaries.

use crate::grid::{Grid, RULE};
use std::borrow::Cow;
use std::error::Error;

/// Both pipeline stages live in one WGSL module. `RULE` is mirrored in the
/// shader source; `build_shader` substitutes the table so the two cannot
/// drift apart.
const ANNEAL_SHADER: &str = r#"
struct Params {
    width: u32,   // interior columns
    lines: u32,   // interior rows
}

@group(0) @binding(0) var<storage, read_write> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> params: Params;

fn at(row: u32, col: u32) -> u32 {
    return row * (params.width + 2u) + col;
}

// Stage 1: populate the halo of `src` from its own opposite interior
// edges. Each invocation writes halo cells only and reads interior cells
// only, so the writes are mutually independent. Invocation i handles
// column i+1 of the top/bottom halo rows and row i+1 of the left/right
// halo columns; invocation 0 also writes the four corners.
@compute @workgroup_size(256)
fn sync_halo(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let w = params.width;
    let l = params.lines;
    if (i < w) {
        let col = i + 1u;
        src[at(0u, col)] = src[at(l, col)];
        src[at(l + 1u, col)] = src[at(1u, col)];
    }
    if (i < l) {
        let row = i + 1u;
        src[at(row, 0u)] = src[at(row, w)];
        src[at(row, w + 1u)] = src[at(row, 1u)];
    }
    if (i == 0u) {
        src[at(0u, 0u)] = src[at(l, w)];
        src[at(0u, w + 1u)] = src[at(l, 1u)];
        src[at(l + 1u, 0u)] = src[at(1u, w)];
        src[at(l + 1u, w + 1u)] = src[at(1u, 1u)];
    }
}

// Stage 2: one invocation per interior cell. Reads the synced source,
// writes the destination at the same position, never touches the halo.
@compute @workgroup_size(16, 16)
fn anneal_step(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.lines) {
        return;
    }
    let row = gid.y + 1u;
    let col = gid.x + 1u;
    let sum = src[at(row - 1u, col - 1u)] + src[at(row - 1u, col)] + src[at(row - 1u, col + 1u)]
            + src[at(row, col - 1u)]     + src[at(row, col)]       + src[at(row, col + 1u)]
            + src[at(row + 1u, col - 1u)] + src[at(row + 1u, col)] + src[at(row + 1u, col + 1u)];
    var rule = array<u32, 10>(RULE_TABLE);
    dst[at(row, col)] = rule[sum];
}
"#;

/// Inline the host rule table into the shader source.
fn build_shader() -> String {
    let table = RULE
        .iter()
        .map(|&v| format!("{}u", v))
        .collect::<Vec<_>>()
        .join(", ");
    ANNEAL_SHADER.replace("RULE_TABLE", &table)
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    width: u32,
    lines: u32,
}

pub struct WgpuSimulation {
    device: wgpu::Device,
    queue: wgpu::Queue,
    halo_pipeline: wgpu::ComputePipeline,
    step_pipeline: wgpu::ComputePipeline,
    grid_buffers: [wgpu::Buffer; 2],
    staging_buffer: wgpu::Buffer,
    /// bind_groups[0] reads buffer 0 / writes buffer 1, [1] the reverse.
    bind_groups: [wgpu::BindGroup; 2],
    /// Index of the buffer currently holding the source role.
    source: usize,
    width: usize,
    lines: usize,
}

impl WgpuSimulation {
    /// Create the device, pipelines, and the device-side grid pair for the
    /// given interior dimensions. No grid data is transferred here; `run`
    /// does the upload. Fatal on any adapter, device, or allocation failure.
    pub fn new(width: usize, lines: usize) -> Result<Self, Box<dyn Error>> {
        pollster::block_on(Self::new_async(width, lines))
    }

    async fn new_async(width: usize, lines: usize) -> Result<Self, Box<dyn Error>> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or("device init: no compatible GPU adapter")?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Anneal Simulation"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| format!("device init: {}", e))?;

        let shader_src = build_shader();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Anneal Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(shader_src)),
        });

        let cell_count = (lines + 2) * (width + 2);
        let buffer_size = (cell_count * 4) as u64;

        let make_grid_buffer = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: buffer_size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let grid_buffers = [make_grid_buffer("Grid A"), make_grid_buffer("Grid B")];

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Params"),
            size: std::mem::size_of::<Params>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Anneal Bind Group Layout"),
            entries: &[
                storage_entry(0),
                storage_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let make_bind_group = |src: &wgpu::Buffer, dst: &wgpu::Buffer, label| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: src.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: dst.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params_buffer.as_entire_binding(),
                    },
                ],
            })
        };
        let bind_groups = [
            make_bind_group(&grid_buffers[0], &grid_buffers[1], "A to B"),
            make_bind_group(&grid_buffers[1], &grid_buffers[0], "B to A"),
        ];

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Anneal Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry_point, label| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: Default::default(),
            })
        };
        let halo_pipeline = make_pipeline("sync_halo", "Halo Pipeline");
        let step_pipeline = make_pipeline("anneal_step", "Step Pipeline");

        let params = Params {
            width: width as u32,
            lines: lines as u32,
        };
        queue.write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        Ok(Self {
            device,
            queue,
            halo_pipeline,
            step_pipeline,
            grid_buffers,
            staging_buffer,
            bind_groups,
            source: 0,
            width,
            lines,
        })
    }

    /// Upload the initial grid, run exactly `iterations` steps, then
    /// download the buffer holding the source role and rebuild the host
    /// grid from it.
    pub fn run(mut self, initial: &Grid, iterations: usize) -> Result<Grid, Box<dyn Error>> {
        assert_eq!(
            (initial.width(), initial.lines()),
            (self.width, self.lines),
            "grid dimensions must match the device buffers"
        );
        // Upload: widen bytes to the device's u32 cells.
        let words: Vec<u32> = initial.raw().iter().map(|&c| u32::from(c)).collect();
        self.queue
            .write_buffer(&self.grid_buffers[self.source], 0, bytemuck::cast_slice(&words));

        let halo_groups = (self.width.max(self.lines) as u32).div_ceil(256).max(1);
        let step_groups_x = (self.width as u32).div_ceil(16);
        let step_groups_y = (self.lines as u32).div_ceil(16);

        for _ in 0..iterations {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Anneal Step"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Anneal Pass"),
                    timestamp_writes: None,
                });
                pass.set_bind_group(0, &self.bind_groups[self.source], &[]);
                pass.set_pipeline(&self.halo_pipeline);
                pass.dispatch_workgroups(halo_groups, 1, 1);
                pass.set_pipeline(&self.step_pipeline);
                pass.dispatch_workgroups(step_groups_x, step_groups_y, 1);
            }
            self.queue.submit(Some(encoder.finish()));
            self.source = 1 - self.source;
        }

        self.device.poll(wgpu::Maintain::Wait);
        self.download()
    }

    fn download(&self) -> Result<Grid, Box<dyn Error>> {
        let size = ((self.lines + 2) * (self.width + 2) * 4) as u64;
        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(
            &self.grid_buffers[self.source],
            0,
            &self.staging_buffer,
            0,
            size,
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = self.staging_buffer.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| "download: map callback dropped")?
            .map_err(|e| format!("download: buffer map failed: {:?}", e))?;

        let data = slice.get_mapped_range();
        let words: &[u32] = bytemuck::cast_slice(&data);
        let raw: Vec<u8> = words.iter().map(|&w| w as u8).collect();
        drop(data);
        self.staging_buffer.unmap();

        Ok(Grid::from_raw(self.width, self.lines, raw))
    }
}
