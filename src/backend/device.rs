//! Accelerator execution over wgpu compute, behind the `accelerator`
//! feature.
//!
//! The recursion state lives on the device: the rescaled CSR matrix, the
//! damping mask and two ping-pong state vectors are uploaded once per
//! sweep, each recursion order is one submitted command buffer (a fused
//! apply-and-combine pass followed by a projection pass), and only the
//! moment matrix is read back at the end. Double precision requires an
//! adapter exposing `SHADER_F64`.

use ndarray::Array2;
use num_complex::Complex;
use std::sync::Arc;
use wgpu::util::DeviceExt;

use crate::{
    damping::DampingMask,
    error::ExpanderError,
    expander::{
        greens::{lorentz_factors, GreensFunctionKind},
        moments::MomentVector,
        table::{GeneratingFunctionTable, TableKey},
    },
    hamiltonian::ScaledHamiltonian,
};

use super::ComputeBackend;

const WORKGROUP_SIZE: u32 = 64;

/// Fused `w = damp .* (H̃ x)` and three-term combination. `first == 1`
/// writes `y = w` for the opening order, otherwise `y = 2 w - y`.
const SWEEP_SHADER: &str = r#"
struct Params {
    rows: u32,
    first: u32,
    pad0: u32,
    pad1: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> row_ptr: array<u32>;
@group(0) @binding(2) var<storage, read> col_idx: array<u32>;
@group(0) @binding(3) var<storage, read> vals: array<f64>;
@group(0) @binding(4) var<storage, read> damp: array<f64>;
@group(0) @binding(5) var<storage, read> x: array<f64>;
@group(0) @binding(6) var<storage, read_write> y: array<f64>;

@compute @workgroup_size(64)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let row = gid.x + gid.y * nwg.x * 64u;
    if (row >= params.rows) {
        return;
    }
    var acc_re = f64(0.0);
    var acc_im = f64(0.0);
    let start = row_ptr[row];
    let end = row_ptr[row + 1u];
    for (var k = start; k < end; k = k + 1u) {
        let c = col_idx[k];
        let a_re = vals[2u * k];
        let a_im = vals[2u * k + 1u];
        let x_re = x[2u * c];
        let x_im = x[2u * c + 1u];
        acc_re = acc_re + a_re * x_re - a_im * x_im;
        acc_im = acc_im + a_re * x_im + a_im * x_re;
    }
    let d_re = damp[2u * row];
    let d_im = damp[2u * row + 1u];
    let w_re = acc_re * d_re - acc_im * d_im;
    let w_im = acc_re * d_im + acc_im * d_re;
    if (params.first == 1u) {
        y[2u * row] = w_re;
        y[2u * row + 1u] = w_im;
    } else {
        y[2u * row] = f64(2.0) * w_re - y[2u * row];
        y[2u * row + 1u] = f64(2.0) * w_im - y[2u * row + 1u];
    }
}
"#;

/// Record `moments[m][step] = v[to[m]]` for every observation.
const PROJECT_SHADER: &str = r#"
struct Params {
    num_to: u32,
    num_coefficients: u32,
    step: u32,
    pad0: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> to_idx: array<u32>;
@group(0) @binding(2) var<storage, read> v: array<f64>;
@group(0) @binding(3) var<storage, read_write> moments: array<f64>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let m = gid.x;
    if (m >= params.num_to) {
        return;
    }
    let t = to_idx[m];
    let at = 2u * (m * params.num_coefficients + params.step);
    moments[at] = v[2u * t];
    moments[at + 1u] = v[2u * t + 1u];
}
"#;

/// Contract pre-damped moments against the mirrored lookup table, one
/// thread per energy sample. `conjugate == 1` reads the conjugate table
/// for the advanced continuation.
const RECONSTRUCT_SHADER: &str = r#"
struct Params {
    resolution: u32,
    num_coefficients: u32,
    conjugate: u32,
    pad0: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> table: array<f64>;
@group(0) @binding(2) var<storage, read> moments: array<f64>;
@group(0) @binding(3) var<storage, read_write> out: array<f64>;

@compute @workgroup_size(64)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let e = gid.x + gid.y * nwg.x * 64u;
    if (e >= params.resolution) {
        return;
    }
    var g_re = f64(0.0);
    var g_im = f64(0.0);
    for (var n = 0u; n < params.num_coefficients; n = n + 1u) {
        let at = 2u * (n * params.resolution + e);
        let t_re = table[at];
        var t_im = table[at + 1u];
        if (params.conjugate == 1u) {
            t_im = -t_im;
        }
        let m_re = moments[2u * n];
        let m_im = moments[2u * n + 1u];
        g_re = g_re + m_re * t_re - m_im * t_im;
        g_im = g_im + m_re * t_im + m_im * t_re;
    }
    out[2u * e] = g_re;
    out[2u * e + 1u] = g_im;
}
"#;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SweepParams {
    rows: u32,
    first: u32,
    pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ProjectParams {
    num_to: u32,
    num_coefficients: u32,
    step: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ReconstructParams {
    resolution: u32,
    num_coefficients: u32,
    conjugate: u32,
    pad: u32,
}

struct TableMirror {
    key: TableKey,
    scale_factor: f64,
    buffer: wgpu::Buffer,
}

/// The wgpu compute backend.
pub(crate) struct DeviceBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sweep_pipeline: wgpu::ComputePipeline,
    project_pipeline: wgpu::ComputePipeline,
    reconstruct_pipeline: wgpu::ComputePipeline,
    table: Option<TableMirror>,
}

impl DeviceBackend {
    /// Select the first adapter with `f64` shader support and build the
    /// compute pipelines.
    pub(crate) fn new() -> Result<Self, ExpanderError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .find(|adapter| adapter.features().contains(wgpu::Features::SHADER_F64))
            .ok_or_else(|| {
                ExpanderError::Accelerator(
                    "no adapter with double-precision shader support".into(),
                )
            })?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("chebyshev-expander"),
                required_features: wgpu::Features::SHADER_F64,
                ..Default::default()
            },
            None,
        ))
        .map_err(|error| ExpanderError::Accelerator(error.to_string()))?;

        let sweep_pipeline = compute_pipeline(&device, "sweep", SWEEP_SHADER);
        let project_pipeline = compute_pipeline(&device, "project", PROJECT_SHADER);
        let reconstruct_pipeline = compute_pipeline(&device, "reconstruct", RECONSTRUCT_SHADER);

        Ok(Self {
            device,
            queue,
            sweep_pipeline,
            project_pipeline,
            reconstruct_pipeline,
            table: None,
        })
    }

    fn storage_buffer(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE,
            })
    }

    fn readback(&self, source: &wgpu::Buffer, size: u64) -> Result<Vec<f64>, ExpanderError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|error| ExpanderError::Accelerator(error.to_string()))?
            .map_err(|error| ExpanderError::Accelerator(error.to_string()))?;

        let data = bytemuck::cast_slice::<u8, f64>(&slice.get_mapped_range()).to_vec();
        staging.unmap();
        Ok(data)
    }

    fn reconstruct_base(
        &self,
        moments: &MomentVector<'_>,
        mirror: &TableMirror,
        conjugate: bool,
    ) -> Result<Vec<Complex<f64>>, ExpanderError> {
        let num_coefficients = moments.num_coefficients();
        let resolution = mirror.key.grid.resolution();

        // Fold the Lorentz damping into the moments on the host; the
        // kernel then contracts plain complex products.
        let lorentz = lorentz_factors(
            num_coefficients,
            moments.broadening(),
            moments.scale_factor(),
        );
        let mut folded = Vec::with_capacity(2 * num_coefficients);
        for (coefficient, factor) in moments.coefficients().iter().zip(lorentz) {
            folded.push(coefficient.re * factor);
            folded.push(coefficient.im * factor);
        }

        let params = ReconstructParams {
            resolution: resolution as u32,
            num_coefficients: num_coefficients as u32,
            conjugate: conjugate as u32,
            pad: 0,
        };
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("reconstruct-params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let moments_buffer = self.storage_buffer("moments", bytemuck::cast_slice(&folded));
        let out_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("greens-function"),
            size: (resolution * 2 * std::mem::size_of::<f64>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let bind_group = bind_group(
            &self.device,
            &self.reconstruct_pipeline,
            &[&params_buffer, &mirror.buffer, &moments_buffer, &out_buffer],
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("reconstruct"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.reconstruct_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (x, y) = split_workgroups(workgroups(resolution));
            pass.dispatch_workgroups(x, y, 1);
        }
        self.queue.submit(Some(encoder.finish()));

        let raw = self.readback(&out_buffer, (resolution * 2 * 8) as u64)?;
        Ok(raw
            .chunks_exact(2)
            .map(|pair| Complex::new(pair[0], pair[1]))
            .collect())
    }
}

impl ComputeBackend for DeviceBackend {
    fn moment_sweep(
        &self,
        hamiltonian: &ScaledHamiltonian<'_>,
        damping: Option<&DampingMask>,
        from: usize,
        to: &[usize],
        num_coefficients: usize,
        cutoff: Option<f64>,
    ) -> Result<Array2<Complex<f64>>, ExpanderError> {
        if cutoff.is_some() {
            return Err(ExpanderError::CutoffOnAccelerator);
        }
        let (indptr, indices, values, inverse_scale) = hamiltonian.raw_parts();
        let rows = indptr.len() - 1;

        let row_ptr: Vec<u32> = indptr.iter().map(|&pointer| pointer as u32).collect();
        let col_idx: Vec<u32> = indices.iter().map(|&column| column as u32).collect();
        // Pre-scale the matrix entries so the kernel applies H/a directly.
        let mut vals = Vec::with_capacity(2 * values.len());
        for value in values {
            vals.push(value.re * inverse_scale);
            vals.push(value.im * inverse_scale);
        }
        let mut damp = Vec::with_capacity(2 * rows);
        match damping {
            Some(mask) => {
                for factor in mask.values() {
                    damp.push(factor.re);
                    damp.push(factor.im);
                }
            }
            None => {
                for _ in 0..rows {
                    damp.push(1.);
                    damp.push(0.);
                }
            }
        }
        let mut initial = vec![0.; 2 * rows];
        initial[2 * from] = 1.;
        let to_idx: Vec<u32> = to.iter().map(|&target| target as u32).collect();

        let row_ptr_buffer = self.storage_buffer("row-ptr", bytemuck::cast_slice(&row_ptr));
        let col_idx_buffer = self.storage_buffer("col-idx", bytemuck::cast_slice(&col_idx));
        let vals_buffer = self.storage_buffer("vals", bytemuck::cast_slice(&vals));
        let damp_buffer = self.storage_buffer("damp", bytemuck::cast_slice(&damp));
        let to_idx_buffer = self.storage_buffer("to-idx", bytemuck::cast_slice(&to_idx));
        let vec_a = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("state-a"),
                contents: bytemuck::cast_slice(&initial),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let vec_b = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("state-b"),
            size: (2 * rows * std::mem::size_of::<f64>()) as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let moments_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("moments"),
            size: (2 * to.len() * num_coefficients * std::mem::size_of::<f64>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let sweep_params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sweep-params"),
            size: std::mem::size_of::<SweepParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let project_params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("project-params"),
            size: std::mem::size_of::<ProjectParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // x reads v_{k-1}, y holds v_{k-2} and receives v_k; the two
        // bind groups alternate the roles of the state buffers.
        let sweep_ab = bind_group(
            &self.device,
            &self.sweep_pipeline,
            &[
                &sweep_params,
                &row_ptr_buffer,
                &col_idx_buffer,
                &vals_buffer,
                &damp_buffer,
                &vec_a,
                &vec_b,
            ],
        );
        let sweep_ba = bind_group(
            &self.device,
            &self.sweep_pipeline,
            &[
                &sweep_params,
                &row_ptr_buffer,
                &col_idx_buffer,
                &vals_buffer,
                &damp_buffer,
                &vec_b,
                &vec_a,
            ],
        );
        let project_a = bind_group(
            &self.device,
            &self.project_pipeline,
            &[&project_params, &to_idx_buffer, &vec_a, &moments_buffer],
        );
        let project_b = bind_group(
            &self.device,
            &self.project_pipeline,
            &[&project_params, &to_idx_buffer, &vec_b, &moments_buffer],
        );

        let (sweep_x, sweep_y) = split_workgroups(workgroups(rows));
        let project_groups = workgroups(to.len());

        for order in 0..num_coefficients {
            self.queue.write_buffer(
                &project_params,
                0,
                bytemuck::bytes_of(&ProjectParams {
                    num_to: to.len() as u32,
                    num_coefficients: num_coefficients as u32,
                    step: order as u32,
                    pad: 0,
                }),
            );
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
            if order > 0 {
                self.queue.write_buffer(
                    &sweep_params,
                    0,
                    bytemuck::bytes_of(&SweepParams {
                        rows: rows as u32,
                        first: (order == 1) as u32,
                        pad: [0; 2],
                    }),
                );
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("sweep"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.sweep_pipeline);
                pass.set_bind_group(0, if order % 2 == 1 { &sweep_ab } else { &sweep_ba }, &[]);
                pass.dispatch_workgroups(sweep_x, sweep_y, 1);
            }
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("project"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.project_pipeline);
                pass.set_bind_group(
                    0,
                    if order == 0 || order % 2 == 0 {
                        &project_a
                    } else {
                        &project_b
                    },
                    &[],
                );
                pass.dispatch_workgroups(project_groups, 1, 1);
            }
            self.queue.submit(Some(encoder.finish()));
        }

        let raw = self.readback(
            &moments_buffer,
            (2 * to.len() * num_coefficients * 8) as u64,
        )?;
        let mut data = Array2::zeros((to.len(), num_coefficients));
        for observation in 0..to.len() {
            for order in 0..num_coefficients {
                let at = 2 * (observation * num_coefficients + order);
                data[[observation, order]] = Complex::new(raw[at], raw[at + 1]);
            }
        }
        Ok(data)
    }

    fn upload_table(
        &mut self,
        table: &Arc<GeneratingFunctionTable>,
    ) -> Result<(), ExpanderError> {
        let mut interleaved = Vec::with_capacity(2 * table.data().len());
        for value in table.data().iter() {
            interleaved.push(value.re);
            interleaved.push(value.im);
        }
        let buffer = self.storage_buffer("lookup-table", bytemuck::cast_slice(&interleaved));
        self.table = Some(TableMirror {
            key: table.key(),
            scale_factor: table.scale_factor(),
            buffer,
        });
        Ok(())
    }

    fn invalidate_table(&mut self) {
        self.table = None;
    }

    fn table_is_loaded(&self) -> bool {
        self.table.is_some()
    }

    fn reconstruct_cached(
        &self,
        moments: &MomentVector<'_>,
        kind: GreensFunctionKind,
    ) -> Result<Vec<Complex<f64>>, ExpanderError> {
        let mirror = self
            .table
            .as_ref()
            .ok_or(ExpanderError::AcceleratorTableNotLoaded)?;
        if mirror.key.num_coefficients != moments.num_coefficients() {
            return Err(ExpanderError::TableKeyMismatch {
                expected: mirror.key.num_coefficients,
                requested: moments.num_coefficients(),
            });
        }
        if mirror.scale_factor != moments.scale_factor() {
            return Err(ExpanderError::ScaleFactorMismatch {
                moments: moments.scale_factor(),
                reconstruction: mirror.scale_factor,
            });
        }
        match kind {
            GreensFunctionKind::Retarded => self.reconstruct_base(moments, mirror, false),
            GreensFunctionKind::Advanced => self.reconstruct_base(moments, mirror, true),
            GreensFunctionKind::Principal | GreensFunctionKind::NonPrincipal => {
                let advanced = self.reconstruct_base(moments, mirror, true)?;
                let retarded = self.reconstruct_base(moments, mirror, false)?;
                let sign = if kind == GreensFunctionKind::Principal {
                    1.
                } else {
                    -1.
                };
                Ok(advanced
                    .into_iter()
                    .zip(retarded)
                    .map(|(advanced, retarded)| (advanced + retarded * sign) * 0.5)
                    .collect())
            }
        }
    }
}

fn compute_pipeline(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: None,
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn bind_group(
    device: &wgpu::Device,
    pipeline: &wgpu::ComputePipeline,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: None,
        layout: &pipeline.get_bind_group_layout(0),
        entries: &entries,
    })
}

fn workgroups(items: usize) -> u32 {
    ((items as u32) + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE
}

/// Split a workgroup count over two dispatch dimensions when it exceeds
/// the per-dimension limit.
fn split_workgroups(groups: u32) -> (u32, u32) {
    const LIMIT: u32 = 65_535;
    if groups <= LIMIT {
        (groups.max(1), 1)
    } else {
        let y = (groups + LIMIT - 1) / LIMIT;
        let x = (groups + y - 1) / y;
        (x, y)
    }
}
