//! Whole frames through small chains, checked through what the passes bind.

#![cfg(feature = "dummy")]

mod common;

use rstest::rstest;

use common::{TestContext, passthrough, test_shaders};
use redlilium_filter_chain::backend::DescriptorWrite;
use redlilium_filter_chain::backend::dummy::RecordedCommand;
use redlilium_filter_chain::common::FINAL_QUAD_OFFSET;
use redlilium_filter_chain::lut::LookupSampling;
use redlilium_filter_chain::semantics::IDENTITY_MVP;
use redlilium_filter_chain::{
    AddressMode, FilterChain, FilterMode, PassConfig, Scale, Semantic, ShaderParameter, Size2D,
    TextureFormat, TextureSemantic, Viewport,
};

const VIEWPORT: Size2D = Size2D::new(1024, 768);

fn texture_binding(chain: &FilterChain, pass: usize, semantic: TextureSemantic, index: usize) -> u32 {
    chain
        .pass(pass)
        .unwrap()
        .reflection()
        .texture(semantic, index)
        .and_then(|slot| slot.texture)
        .unwrap()
        .binding
}

#[rstest]
#[case::linear(FilterMode::Linear)]
#[case::nearest(FilterMode::Nearest)]
fn test_identity_single_pass(#[case] filter: FilterMode) {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain =
        FilterChain::create_default(ctx.backend.clone(), &ctx.create_info(1), filter).unwrap();
    let input = ctx.input_image(ctx.max_input_size);
    let cmd = ctx.run_frame(&mut chain, 0, input);

    let pass = chain.pass(0).unwrap();
    assert_eq!(pass.current_size(), VIEWPORT);
    assert!(chain.history().len() == 0);
    assert!(pass.feedback_framebuffer().is_none());

    let commands = ctx.backend.commands(cmd);
    assert!(
        !commands
            .iter()
            .any(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
    );
    assert!(commands.contains(&RecordedCommand::SetViewport(ctx.swapchain.viewport)));
    assert!(commands.contains(&RecordedCommand::Draw {
        vertex_count: 4,
        first_vertex: 0
    }));
    assert!(commands.contains(&RecordedCommand::BindVertexBuffer {
        buffer: chain.common().unwrap().vbo().handle(),
        offset: FINAL_QUAD_OFFSET,
    }));

    // The input is sampled as-is, with the requested filter.
    let writes = ctx.writes(&chain, 0, 0);
    assert!(writes.contains(&DescriptorWrite::SampledImage {
        binding: 1,
        view: input.view,
        layout: input.layout,
    }));
    let sampler = chain
        .common()
        .unwrap()
        .samplers()
        .get(filter, FilterMode::Nearest, AddressMode::ClampToEdge);
    assert!(writes.contains(&DescriptorWrite::Sampler {
        binding: 2,
        sampler
    }));

    let mvp = pass.reflection().semantic(Semantic::Mvp);
    let bytes = ctx.ubo_bytes(&chain, 0, 0);
    let offset = mvp.ubo_offset.unwrap() as usize;
    let matrix: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[offset..offset + 64]);
    assert_eq!(matrix, IDENTITY_MVP.to_vec());
    assert!(ctx.backend.violations().is_empty());
}

#[test]
fn test_caller_mvp_reaches_final_pass() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain =
        FilterChain::create_default(ctx.backend.clone(), &ctx.create_info(1), FilterMode::Linear)
            .unwrap();
    let input = ctx.input_image(ctx.max_input_size);

    let mut mvp = IDENTITY_MVP;
    mvp[0] = 2.0;
    mvp[12] = -1.0;
    let viewport = Viewport::new(16.0, 8.0, 512.0, 384.0);

    chain.notify_sync_index(0);
    chain.set_input_texture(input);
    let cmd = ctx.backend.begin_command_buffer();
    chain.build_offscreen_passes(cmd, &viewport);
    chain.build_viewport_pass(cmd, &viewport, Some(&mvp));
    chain.end_frame(cmd);

    let offset = chain
        .pass(0)
        .unwrap()
        .reflection()
        .semantic(Semantic::Mvp)
        .ubo_offset
        .unwrap() as usize;
    let bytes = ctx.ubo_bytes(&chain, 0, 0);
    let matrix: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[offset..offset + 64]);
    assert_eq!(matrix, mvp.to_vec());

    let commands = ctx.backend.commands(cmd);
    assert!(commands.contains(&RecordedCommand::SetViewport(viewport)));
    assert!(commands.contains(&RecordedCommand::SetScissor(viewport.scissor())));
    assert_eq!(chain.pass(0).unwrap().current_size(), Size2D::new(512, 384));
}

/// Pass 0 renders at half the source; the final pass must see exactly that.
#[rstest]
#[case::full(Size2D::new(320, 240))]
#[case::snes(Size2D::new(256, 224))]
#[case::odd(Size2D::new(100, 50))]
fn test_two_pass_half_resolution(#[case] input_size: Size2D) {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(2);
    chain.set_shader(0, passthrough());
    chain.set_shader(
        1,
        test_shaders(
            &[("SourceSize", "vec4<f32>"), ("OriginalSize", "vec4<f32>")],
            &["Source"],
        ),
    );
    chain.set_pass_config(
        0,
        PassConfig {
            scale: Scale::source(0.5),
            ..Default::default()
        },
    );
    chain.set_pass_config(
        1,
        PassConfig {
            scale: Scale::viewport(1.0),
            ..Default::default()
        },
    );
    chain.init().unwrap();

    let input = ctx.input_image(input_size);
    let cmd = ctx.run_frame(&mut chain, 0, input);

    let half = Size2D::new(input_size.width / 2, input_size.height / 2);
    let first = chain.pass(0).unwrap();
    let output = first.framebuffer().unwrap();
    assert_eq!(output.size(), half);
    assert_eq!(ctx.bound_view(&chain, 1, 0, 1), Some(output.view()));

    let reflection = chain.pass(1).unwrap().reflection();
    let source = reflection.texture(TextureSemantic::Source, 0).unwrap().size;
    let original = reflection.texture(TextureSemantic::Original, 0).unwrap().size;
    let (w, h) = (half.width as f32, half.height as f32);
    assert_eq!(ctx.ubo_vec4(&chain, 1, 0, source), [w, h, 1.0 / w, 1.0 / h]);
    let (w, h) = (input_size.width as f32, input_size.height as f32);
    assert_eq!(ctx.ubo_vec4(&chain, 1, 0, original), [w, h, 1.0 / w, 1.0 / h]);

    // Offscreen pass: own render pass over its whole target, then readable.
    let commands = ctx.backend.commands(cmd);
    assert!(commands.contains(&RecordedCommand::BeginRenderPass {
        render_pass: output.render_pass(),
        framebuffer: output.framebuffer(),
        size: half,
    }));
    assert!(commands.contains(&RecordedCommand::SetViewport(Viewport::from_dimensions(
        half.width,
        half.height
    ))));
    assert!(ctx.backend.violations().is_empty());
}

#[test]
fn test_output_and_viewport_sizes() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(1);
    chain.set_shader(
        0,
        test_shaders(
            &[
                ("OutputSize", "vec4<f32>"),
                ("FinalViewportSize", "vec4<f32>"),
            ],
            &["Source"],
        ),
    );
    chain.set_pass_config(
        0,
        PassConfig {
            scale: Scale::viewport(0.5),
            ..Default::default()
        },
    );
    chain.init().unwrap();
    ctx.run_frame(&mut chain, 0, ctx.input_image(ctx.max_input_size));

    let reflection = chain.pass(0).unwrap().reflection().clone();
    assert_eq!(
        ctx.ubo_vec4(&chain, 0, 0, reflection.semantic(Semantic::Output)),
        [512.0, 384.0, 1.0 / 512.0, 1.0 / 384.0]
    );
    assert_eq!(
        ctx.ubo_vec4(&chain, 0, 0, reflection.semantic(Semantic::FinalViewport)),
        [1024.0, 768.0, 1.0 / 1024.0, 1.0 / 768.0]
    );
}

#[test]
fn test_parameters_are_filtered_and_live() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(1);
    let gamma = chain
        .preset_mut()
        .push_parameter(ShaderParameter::new("gamma", 2.2, 1.0, 3.0, 0.1));
    let unused = chain
        .preset_mut()
        .push_parameter(ShaderParameter::new("unused", 0.5, 0.0, 1.0, 0.1));
    chain.add_parameter(0, gamma, "gamma");
    chain.add_parameter(0, unused, "unused");
    chain.set_shader(0, test_shaders(&[("gamma", "f32")], &["Source"]));
    chain.init().unwrap();

    let pass = chain.pass(0).unwrap();
    assert_eq!(pass.parameters().len(), 2);
    assert_eq!(pass.filtered_parameters().len(), 1);
    assert_eq!(pass.filtered_parameters()[0].id, "gamma");
    let location = pass.reflection().parameter(0);

    let input = ctx.input_image(ctx.max_input_size);
    ctx.run_frame(&mut chain, 0, input);
    assert_eq!(ctx.ubo_f32(&chain, 0, 0, location), 2.2);

    chain.preset_mut().parameter_mut("gamma").unwrap().set(1.5);
    ctx.run_frame(&mut chain, 1, input);
    assert_eq!(ctx.ubo_f32(&chain, 0, 1, location), 1.5);
}

#[rstest]
#[case::no_wrap(0, 1001, 1001)]
#[case::wrap(100, 1001, 1)]
#[case::wrap_exact(7, 14, 0)]
fn test_frame_count_period(#[case] period: u32, #[case] count: u64, #[case] expected: u32) {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(1);
    chain.set_shader(
        0,
        test_shaders(&[("FrameCount", "u32"), ("FrameDirection", "i32")], &["Source"]),
    );
    chain.set_frame_count_period(0, period);
    chain.init().unwrap();
    chain.set_frame_count(count);
    chain.set_frame_direction(-1);
    ctx.run_frame(&mut chain, 0, ctx.input_image(ctx.max_input_size));

    let reflection = chain.pass(0).unwrap().reflection().clone();
    assert_eq!(
        ctx.ubo_u32(&chain, 0, 0, reflection.semantic(Semantic::FrameCount)),
        expected
    );
    assert_eq!(
        ctx.ubo_u32(&chain, 0, 0, reflection.semantic(Semantic::FrameDirection)) as i32,
        -1
    );
}

#[test]
fn test_lookup_texture_bound_by_id() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(1);
    let upload = ctx.backend.begin_command_buffer();
    let index = chain
        .add_lookup_texture(
            upload,
            "mask",
            Size2D::new(2, 2),
            TextureFormat::Rgba8Unorm,
            &[0x80; 16],
            LookupSampling {
                filter: FilterMode::Nearest,
                address: AddressMode::Repeat,
                ..Default::default()
            },
        )
        .unwrap();
    chain.set_shader(
        0,
        test_shaders(&[("maskSize", "vec4<f32>")], &["Source", "mask"]),
    );
    chain.init().unwrap();
    ctx.run_frame(&mut chain, 0, ctx.input_image(ctx.max_input_size));

    let lut = chain.lookup_textures()[index].texture().image;
    let binding = texture_binding(&chain, 0, TextureSemantic::User, index);
    assert_eq!(ctx.bound_view(&chain, 0, 0, binding), Some(lut.view));

    let size = chain
        .pass(0)
        .unwrap()
        .reflection()
        .texture(TextureSemantic::User, index)
        .unwrap()
        .size;
    assert_eq!(ctx.ubo_vec4(&chain, 0, 0, size), [2.0, 2.0, 0.5, 0.5]);

    let sampler = chain
        .common()
        .unwrap()
        .samplers()
        .get(FilterMode::Nearest, FilterMode::Nearest, AddressMode::Repeat);
    assert!(ctx.writes(&chain, 0, 0).contains(&DescriptorWrite::Sampler {
        binding: binding + 1,
        sampler
    }));

    // Starting a frame lets go of the upload staging buffer.
    assert!(!chain.lookup_textures()[index].has_staging_buffer());
}

#[test]
fn test_earlier_pass_output_by_name() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(3);
    chain.set_pass_name(0, "first");
    chain.set_shader(0, passthrough());
    chain.set_shader(1, passthrough());
    chain.set_shader(
        2,
        test_shaders(&[("PassOutputSize1", "vec4<f32>")], &["Source", "first"]),
    );
    chain.set_pass_config(
        0,
        PassConfig {
            scale: Scale::source(2.0),
            ..Default::default()
        },
    );
    chain.set_pass_config(
        1,
        PassConfig {
            scale: Scale::absolute(64.0, 32.0),
            ..Default::default()
        },
    );
    chain.init().unwrap();
    ctx.run_frame(&mut chain, 0, ctx.input_image(ctx.max_input_size));

    let first_view = chain.pass(0).unwrap().framebuffer().unwrap().view();
    let binding = texture_binding(&chain, 2, TextureSemantic::PassOutput, 0);
    assert_eq!(ctx.bound_view(&chain, 2, 0, binding), Some(first_view));

    let size = chain
        .pass(2)
        .unwrap()
        .reflection()
        .texture(TextureSemantic::PassOutput, 1)
        .unwrap()
        .size;
    assert_eq!(
        ctx.ubo_vec4(&chain, 2, 0, size),
        [64.0, 32.0, 1.0 / 64.0, 1.0 / 32.0]
    );
    assert!(ctx.backend.violations().is_empty());
}
