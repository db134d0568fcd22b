//! GPU scanout pipeline for the video interface.
//!
//! [`VideoInterface`] owns the register file, per-scanline sessions, and cross-frame
//! state, and turns the current framebuffer in RDRAM into a displayable RGBA8 texture
//! through five render passes: VRAM fetch, anti-aliasing, divot, scale, and (optionally)
//! downscale and deinterlace.

mod frame;
mod gamma;
mod stages;

use std::sync::Arc;

use thiserror::Error;
use vi_core::{
    decode_registers, needs_fetch_bug_emulation, DebugChannel, DebugMessage, DecodedRegisters,
    DeinterlaceMode, PerScanlineFlags, PerScanlineRegister, PerScanlineSession, PixelFormat,
    RegisterFile, ScanoutOptions, ViRegister,
};

use crate::stages::{
    create_stage_texture, create_storage_buffer, create_uniform_buffer, run_stage,
    DeinterlaceParams, DownscaleParams, FetchParams, FilterParams, ScaleParams, StagePipelines,
};

pub use frame::{CompletionSignal, ScanoutBuffer, ScanoutImage};
pub use vi_core;

// Output geometry when the register state cannot produce an image.
const BLANK_WIDTH: u32 = 640;
const BLANK_HEIGHT: u32 = 480;

const STAGE_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC);

#[derive(Debug, Error)]
pub enum ScanoutError {
    #[error("no RDRAM buffer is bound")]
    RdramNotBound,
    #[error("scanout output {width}x{height} exceeds device texture limit {max}")]
    ImageTooLarge { width: u32, height: u32, max: u32 },
    #[error("export scanout cannot be combined with persist_frame_on_invalid_input")]
    ExportWithPersistence,
}

struct RdramBinding {
    buffer: Arc<wgpu::Buffer>,
    // Byte offset of RDRAM's base within the buffer; must be word-aligned.
    base_offset: u64,
    // Byte length of the RDRAM region; fetches past it read as zero.
    len: u64,
}

/// The register state machine plus the GPU pipeline that scans it out.
pub struct VideoInterface {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: StagePipelines,
    gamma_buffer: wgpu::Buffer,
    registers: RegisterFile,
    per_scanline: PerScanlineSession,
    rdram: Option<RdramBinding>,
    hidden_rdram: Option<Arc<wgpu::Buffer>>,
    frames: frame::FrameManager,
    debug: DebugChannel,
}

impl VideoInterface {
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let pipelines = StagePipelines::create(&device);
        let gamma_buffer = gamma::create_gamma_buffer(&device);

        Self {
            device,
            queue,
            pipelines,
            gamma_buffer,
            registers: RegisterFile::new(),
            per_scanline: PerScanlineSession::new(),
            rdram: None,
            hidden_rdram: None,
            frames: frame::FrameManager::new(),
            debug: DebugChannel::new(),
        }
    }

    pub fn set_vi_register(&mut self, register: ViRegister, value: u32) {
        self.registers.write(register, value);
    }

    #[must_use]
    pub fn vi_register(&self, register: ViRegister) -> u32 {
        self.registers.read(register)
    }

    /// Binds the buffer region holding RDRAM: `base_offset` bytes into the buffer,
    /// `len` bytes long. Both must be word-aligned; unaligned values are truncated down.
    /// Fetches past the bound length read as zero rather than spilling into whatever
    /// else the host keeps in the buffer.
    pub fn set_rdram(&mut self, buffer: Arc<wgpu::Buffer>, base_offset: u64, len: u64) {
        if base_offset % 4 != 0 || len % 4 != 0 {
            log::warn!(
                "RDRAM binding {base_offset:#X}+{len:#X} is not word-aligned; truncating"
            );
        }
        let base_offset = base_offset & !3;
        let len = (len & !3).min(buffer.size().saturating_sub(base_offset));
        self.rdram = Some(RdramBinding { buffer, base_offset, len });
    }

    /// Binds the hidden-bit memory holding the low two coverage bits per 16-bit texel.
    /// Optional; unbound hidden memory reads as full coverage.
    pub fn set_hidden_rdram(&mut self, buffer: Arc<wgpu::Buffer>) {
        self.hidden_rdram = Some(buffer);
    }

    pub fn begin_vi_register_per_scanline(&mut self, flags: PerScanlineFlags) {
        self.per_scanline.begin(flags, &self.registers);
    }

    pub fn set_vi_register_for_scanline(&mut self, register: PerScanlineRegister, value: u32) {
        self.per_scanline.set(register, value);
    }

    pub fn latch_vi_register_for_scanline(&mut self, line: u32) {
        self.per_scanline.latch(line);
    }

    pub fn end_vi_register_per_scanline(&mut self) {
        self.per_scanline.end();
    }

    pub fn set_debug_callback(
        &mut self,
        callback: impl FnMut(&DebugMessage<'_>) + Send + 'static,
    ) {
        self.debug.set_callback(callback);
    }

    pub fn debug_channel_mut(&mut self) -> &mut DebugChannel {
        &mut self.debug
    }

    /// Total scanouts performed, including degenerate and persisted ones.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames.frame_count()
    }

    /// `frame_count` as of the most recent scanout with displayable register state.
    #[must_use]
    pub fn last_valid_frame_count(&self) -> u64 {
        self.frames.last_valid_frame_count()
    }

    /// Byte offset/length of the RDRAM region the next scanout will read.
    #[must_use]
    pub fn scanout_memory_range(&self, options: &ScanoutOptions) -> (u32, u32) {
        let (decoded, _) = decode_registers(&self.registers, &self.per_scanline, options, 1);
        decoded.scanout_memory_range()
    }

    /// Scans the current register state out into a new GPU texture.
    pub fn scanout(
        &mut self,
        options: &ScanoutOptions,
        scale_factor: u32,
    ) -> Result<ScanoutImage, ScanoutError> {
        let (image, _) = self.scanout_impl(options, scale_factor, false)?;
        Ok(image)
    }

    /// Scans out and additionally copies the result into a mappable buffer.
    pub fn scanout_to_buffer(
        &mut self,
        options: &ScanoutOptions,
        scale_factor: u32,
    ) -> Result<(ScanoutImage, ScanoutBuffer), ScanoutError> {
        let (image, buffer) = self.scanout_impl(options, scale_factor, true)?;
        // Export always produces a buffer: the persistence policy is rejected up front,
        // so every path below submits a fresh copy.
        let buffer = buffer.ok_or(ScanoutError::ExportWithPersistence)?;
        Ok((image, buffer))
    }

    fn scanout_impl(
        &mut self,
        options: &ScanoutOptions,
        scale_factor: u32,
        force_export: bool,
    ) -> Result<(ScanoutImage, Option<ScanoutBuffer>), ScanoutError> {
        let export = force_export || options.export_scanout;
        if export && options.persist_frame_on_invalid_input {
            return Err(ScanoutError::ExportWithPersistence);
        }

        let scale = scale_factor.max(1);
        let (decoded, h_info) =
            decode_registers(&self.registers, &self.per_scanline, options, scale);

        if decoded.is_degenerate() {
            self.debug.message(&DebugMessage {
                tag: "vi",
                code: 0,
                coord: [0, 0, 0],
                words: &[
                    self.registers.read(ViRegister::Control),
                    self.registers.read(ViRegister::HStart),
                    self.registers.read(ViRegister::VStart),
                ],
            });

            if options.persist_frame_on_invalid_input {
                if let Some(image) = self.frames.persist_previous() {
                    log::debug!("degenerate register state, re-returning previous frame");
                    return Ok((image, None));
                }
            }
            return self.blank_scanout(scale, export);
        }

        self.render_scanout(&decoded, &h_info, options, scale, export)
    }

    fn render_scanout(
        &mut self,
        decoded: &DecodedRegisters,
        h_info: &vi_core::HorizontalInfoLines,
        options: &ScanoutOptions,
        scale: u32,
        export: bool,
    ) -> Result<(ScanoutImage, Option<ScanoutBuffer>), ScanoutError> {
        let rdram = self.rdram.as_ref().ok_or(ScanoutError::RdramNotBound)?;

        let features = options.features;
        let control = decoded.control;
        let interlaced = control.serrate && features.serrate;

        let fetch_width = (decoded.max_x + 1) as u32;
        let fetch_height = (decoded.max_y + 1) as u32;
        let scaled_width = (decoded.h_res as u32) * scale;
        let scaled_height = (decoded.v_res as u32) * scale;

        let mut final_width = scaled_width;
        let mut final_height = scaled_height;
        for _ in 0..options.downscale_steps {
            final_width = (final_width / 2).max(1);
            final_height = (final_height / 2).max(1);
        }
        if interlaced {
            final_height *= 2;
        }

        let max_dim = self.device.limits().max_texture_dimension_2d;
        let widest = scaled_width.max(final_width);
        let tallest = scaled_height.max(final_height);
        if widest > max_dim || tallest > max_dim {
            return Err(ScanoutError::ImageTooLarge {
                width: widest,
                height: tallest,
                max: max_dim,
            });
        }

        let fetch_bug = needs_fetch_bug_emulation(decoded, scale);
        if fetch_bug {
            self.debug.message(&DebugMessage {
                tag: "vi",
                code: 1,
                coord: [0, 0, 0],
                words: &[decoded.x_add as u32],
            });
        }

        let rdram_word_offset =
            ((rdram.base_offset + u64::from(decoded.vi_offset)) / 4) as u32;
        let rdram_bound_words = (rdram.len / 4) as u32;
        let hidden_word_len =
            self.hidden_rdram.as_ref().map_or(0, |buffer| (buffer.size() / 4) as u32);

        let fetch_params = FetchParams {
            rdram_word_offset,
            rdram_word_len: rdram_bound_words.saturating_sub(decoded.vi_offset / 4),
            hidden_byte_offset: decoded.vi_offset / 2,
            hidden_word_len,
            vi_width: decoded.vi_width as u32,
            fmt_rgba32: u32::from(control.format == PixelFormat::Rgba8888),
            fetch_bug: u32::from(fetch_bug),
            padding: 0,
        };

        let mut encoder =
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: "vi_scanout_encoder".into(),
            });

        // Stage 1: VRAM fetch.
        let fetch_texture = create_stage_texture(
            &self.device,
            "vi_fetch_texture",
            fetch_width,
            fetch_height,
            STAGE_USAGES,
        );
        let fetch_uniform = create_uniform_buffer(&self.device, "fetch_params", &fetch_params);
        // Hidden memory is optional; fall back to the RDRAM buffer with a zero length so
        // the shader never reads it.
        let hidden_buffer = self.hidden_rdram.as_deref().unwrap_or(&rdram.buffer);
        let fetch_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: "fetch_bind_group".into(),
            layout: &self.pipelines.fetch.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(
                        rdram.buffer.as_entire_buffer_binding(),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(
                        hidden_buffer.as_entire_buffer_binding(),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(
                        fetch_uniform.as_entire_buffer_binding(),
                    ),
                },
            ],
        });
        run_stage(
            &mut encoder,
            "vi_fetch_pass",
            &self.pipelines.fetch,
            &fetch_bind_group,
            &fetch_texture.create_view(&wgpu::TextureViewDescriptor::default()),
        );

        let mut current = fetch_texture;

        // Stage 2: anti-aliasing and dither reconstruction.
        let aa_enabled = control.aa_mode.aa_enabled() && features.aa;
        let dither_filter = control.dither_filter && features.dither_filter;
        if aa_enabled || dither_filter {
            let filter_params = FilterParams {
                max_x: decoded.max_x,
                max_y: decoded.max_y,
                aa_enabled: u32::from(aa_enabled),
                dither_filter: u32::from(dither_filter),
            };
            current = self.run_filter_pass(
                &mut encoder,
                &current,
                fetch_width,
                fetch_height,
                &filter_params,
                true,
            );
        }

        // Stage 3: divot.
        if control.divot && features.divot_filter {
            let filter_params = FilterParams {
                max_x: decoded.max_x,
                max_y: decoded.max_y,
                aa_enabled: 0,
                dither_filter: 0,
            };
            current = self.run_filter_pass(
                &mut encoder,
                &current,
                fetch_width,
                fetch_height,
                &filter_params,
                false,
            );
        }

        // Stage 4: scale, crop, gamma.
        let scale_params = ScaleParams {
            scale_factor: scale as i32,
            frame_h_start: decoded.h_start,
            scissor_x0: decoded.h_start_clamp,
            scissor_x1: decoded.h_start_clamp + decoded.h_res_clamp,
            scissor_y0: decoded.v_start_clamp,
            scissor_y1: decoded.v_start_clamp + decoded.v_res_clamp,
            max_x: decoded.max_x,
            max_y: decoded.max_y,
            gamma_enable: u32::from(control.gamma),
            gamma_dither: u32::from(control.gamma_dither && features.gamma_dither),
            resample: u32::from(control.aa_mode.resample_enabled() && features.scale),
            padding: 0,
        };
        let scale_uniform = create_uniform_buffer(&self.device, "scale_params", &scale_params);
        let h_info_buffer =
            create_storage_buffer(&self.device, "h_info_buffer", h_info.as_bytes());
        let scale_texture = create_stage_texture(
            &self.device,
            "vi_scale_texture",
            scaled_width,
            scaled_height,
            STAGE_USAGES,
        );
        let scale_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: "scale_bind_group".into(),
            layout: &self.pipelines.scale.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        &current.create_view(&wgpu::TextureViewDescriptor::default()),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(
                        h_info_buffer.as_entire_buffer_binding(),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(
                        scale_uniform.as_entire_buffer_binding(),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Buffer(
                        self.gamma_buffer.as_entire_buffer_binding(),
                    ),
                },
            ],
        });
        run_stage(
            &mut encoder,
            "vi_scale_pass",
            &self.pipelines.scale,
            &scale_bind_group,
            &scale_texture.create_view(&wgpu::TextureViewDescriptor::default()),
        );
        current = scale_texture;
        let mut current_width = scaled_width;
        let mut current_height = scaled_height;

        // Stage 5: downscale passes.
        for step in 0..options.downscale_steps {
            let dst_width = (current_width / 2).max(1);
            let dst_height = (current_height / 2).max(1);
            let params = DownscaleParams {
                src_width: current_width as i32,
                src_height: current_height as i32,
                padding: [0; 2],
            };
            let uniform = create_uniform_buffer(&self.device, "downscale_params", &params);
            let target = create_stage_texture(
                &self.device,
                "vi_downscale_texture",
                dst_width,
                dst_height,
                STAGE_USAGES,
            );
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: "downscale_bind_group".into(),
                layout: &self.pipelines.downscale.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(
                            &current.create_view(&wgpu::TextureViewDescriptor::default()),
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Buffer(
                            uniform.as_entire_buffer_binding(),
                        ),
                    },
                ],
            });
            run_stage(
                &mut encoder,
                "vi_downscale_pass",
                &self.pipelines.downscale,
                &bind_group,
                &target.create_view(&wgpu::TextureViewDescriptor::default()),
            );
            current = target;
            current_width = dst_width;
            current_height = dst_height;
            log::trace!("downscale step {step}: {current_width}x{current_height}");
        }

        // Stage 6: deinterlace.
        if interlaced {
            let previous = self.frames.previous_frame().filter(|image| {
                !self.frames.previous_frame_blank()
                    && image.width == current_width
                    && image.height == current_height * 2
            });
            let has_previous = previous.is_some();

            let stage = match options.deinterlace {
                DeinterlaceMode::Weave => &self.pipelines.deinterlace_weave,
                DeinterlaceMode::UpscaleOffset => &self.pipelines.deinterlace_bob,
            };
            let params = DeinterlaceParams {
                field: decoded.v_current_field as u32,
                blend_previous: u32::from(options.blend_previous_frame),
                has_previous: u32::from(has_previous),
                src_height: current_height as i32,
            };
            let uniform = create_uniform_buffer(&self.device, "deinterlace_params", &params);
            let target = create_stage_texture(
                &self.device,
                "vi_deinterlace_texture",
                current_width,
                current_height * 2,
                STAGE_USAGES,
            );
            let current_view = current.create_view(&wgpu::TextureViewDescriptor::default());
            let previous_view = previous.map_or_else(
                || current.create_view(&wgpu::TextureViewDescriptor::default()),
                |image| image.texture.create_view(&wgpu::TextureViewDescriptor::default()),
            );
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: "deinterlace_bind_group".into(),
                layout: &stage.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&current_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&previous_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Buffer(
                            uniform.as_entire_buffer_binding(),
                        ),
                    },
                ],
            });
            run_stage(
                &mut encoder,
                "vi_deinterlace_pass",
                stage,
                &bind_group,
                &target.create_view(&wgpu::TextureViewDescriptor::default()),
            );
            current = target;
            current_height *= 2;
        }

        debug_assert_eq!((current_width, current_height), (final_width, final_height));

        let export_target =
            export.then(|| self.copy_for_export(&mut encoder, &current, current_width, current_height));

        self.queue.submit(std::iter::once(encoder.finish()));
        let completion = CompletionSignal::register(&self.queue);

        let image = ScanoutImage {
            texture: Arc::new(current),
            width: current_width,
            height: current_height,
            completion: completion.clone(),
        };
        self.frames.complete_frame(image.clone(), false);

        let buffer = export_target.map(|(buffer, row_pitch)| ScanoutBuffer {
            buffer,
            width: current_width,
            height: current_height,
            row_pitch,
            completion,
        });

        Ok((image, buffer))
    }

    fn run_filter_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::Texture,
        width: u32,
        height: u32,
        params: &FilterParams,
        aa: bool,
    ) -> wgpu::Texture {
        let (stage, label) = if aa {
            (&self.pipelines.aa, "vi_aa")
        } else {
            (&self.pipelines.divot, "vi_divot")
        };

        let uniform = create_uniform_buffer(&self.device, "filter_params", params);
        let target =
            create_stage_texture(&self.device, &format!("{label}_texture"), width, height, STAGE_USAGES);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: format!("{label}_bind_group").as_str().into(),
            layout: &stage.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        &input.create_view(&wgpu::TextureViewDescriptor::default()),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(uniform.as_entire_buffer_binding()),
                },
            ],
        });
        run_stage(
            encoder,
            &format!("{label}_pass"),
            stage,
            &bind_group,
            &target.create_view(&wgpu::TextureViewDescriptor::default()),
        );
        target
    }

    /// Appends a texture-to-buffer copy with copy-aligned rows. Returns the buffer and
    /// its row pitch in bytes.
    fn copy_for_export(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> (wgpu::Buffer, u32) {
        let row_pitch = (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: "vi_export_buffer".into(),
            size: u64::from(row_pitch) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row_pitch),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );

        (buffer, row_pitch)
    }

    /// Produces a black frame of fixed geometry. Used when register state is degenerate
    /// and there is no previous frame to persist (or persistence is disabled).
    fn blank_scanout(
        &mut self,
        scale: u32,
        export: bool,
    ) -> Result<(ScanoutImage, Option<ScanoutBuffer>), ScanoutError> {
        let width = BLANK_WIDTH * scale;
        let height = BLANK_HEIGHT * scale;

        let max_dim = self.device.limits().max_texture_dimension_2d;
        if width > max_dim || height > max_dim {
            return Err(ScanoutError::ImageTooLarge { width, height, max: max_dim });
        }

        let texture =
            create_stage_texture(&self.device, "vi_blank_texture", width, height, STAGE_USAGES);
        let mut encoder =
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: "vi_blank_encoder".into(),
            });

        // A cleared render pass with no draws.
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: "vi_blank_pass".into(),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        let export_target =
            export.then(|| self.copy_for_export(&mut encoder, &texture, width, height));

        self.queue.submit(std::iter::once(encoder.finish()));
        let completion = CompletionSignal::register(&self.queue);

        let image = ScanoutImage {
            texture: Arc::new(texture),
            width,
            height,
            completion: completion.clone(),
        };
        self.frames.complete_frame(image.clone(), true);

        let buffer = export_target.map(|(buffer, row_pitch)| ScanoutBuffer {
            buffer,
            width,
            height,
            row_pitch,
            completion,
        });

        Ok((image, buffer))
    }
}
