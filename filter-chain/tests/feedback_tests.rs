//! Pass feedback: a pass reading another pass's output from the previous frame.

#![cfg(feature = "dummy")]

mod common;

use rstest::rstest;

use common::{TestContext, passthrough, test_shaders};
use redlilium_filter_chain::backend::dummy::RecordedCommand;
use redlilium_filter_chain::{
    ChainState, FilterChain, FilterChainError, PassConfig, Scale, Size2D, TextureSemantic,
};

const VIEWPORT: Size2D = Size2D::new(640, 480);

fn feedback_chain(ctx: &TestContext, last: redlilium_filter_chain::PassShaders) -> FilterChain {
    let mut chain = ctx.chain(2);
    chain.set_shader(0, passthrough());
    chain.set_shader(1, last);
    chain.set_pass_config(
        1,
        PassConfig {
            scale: Scale::viewport(1.0),
            ..Default::default()
        },
    );
    chain.init().unwrap();
    chain
}

fn feedback_binding(chain: &FilterChain) -> u32 {
    chain
        .pass(1)
        .unwrap()
        .reflection()
        .texture(TextureSemantic::PassFeedback, 0)
        .and_then(|slot| slot.texture)
        .unwrap()
        .binding
}

#[test]
fn test_feedback_storage_only_where_referenced() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let chain = feedback_chain(&ctx, test_shaders(&[], &["Source", "PassFeedback0"]));

    let first = chain.pass(0).unwrap();
    let feedback = first.feedback_framebuffer().unwrap();
    let output = first.framebuffer().unwrap();
    assert_ne!(feedback.image(), output.image());
    assert_eq!(feedback.size(), output.size());
    assert_eq!(feedback.format(), output.format());
    assert_eq!(chain.common().unwrap().feedback().len(), 1);

    let plain = feedback_chain(&ctx, passthrough());
    assert!(plain.pass(0).unwrap().feedback_framebuffer().is_none());
    assert!(plain.common().unwrap().feedback().is_empty());
}

/// At frame F the feedback texture is exactly what the pass rendered at F-1.
#[rstest]
#[case::two_slots(2)]
#[case::three_slots(3)]
fn test_feedback_is_previous_output(#[case] num_slots: usize) {
    let ctx = TestContext::new(VIEWPORT, num_slots);
    let mut chain = feedback_chain(&ctx, test_shaders(&[], &["Source", "PassFeedback0"]));
    let binding = feedback_binding(&chain);
    let input = ctx.input_image(ctx.max_input_size);

    let mut previous_output = None;
    for frame in 0..8 {
        let slot = frame % num_slots;
        let output = chain.pass(0).unwrap().framebuffer().unwrap().view();
        ctx.run_frame(&mut chain, slot, input);

        // The source of the last pass is this frame's output.
        assert_eq!(ctx.bound_view(&chain, 1, slot, 1), Some(output));
        if let Some(previous) = previous_output {
            assert_eq!(ctx.bound_view(&chain, 1, slot, binding), Some(previous));
        }
        previous_output = Some(output);
    }
    assert!(ctx.backend.violations().is_empty());
}

#[test]
fn test_feedback_cleared_once() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = feedback_chain(&ctx, test_shaders(&[], &["Source", "PassFeedback0"]));
    let input = ctx.input_image(ctx.max_input_size);

    let feedback = chain.pass(0).unwrap().feedback_framebuffer().unwrap().image();
    let cmd = ctx.run_frame(&mut chain, 0, input);
    assert!(ctx.backend.commands(cmd).iter().any(|c| matches!(
        c,
        RecordedCommand::ClearImage { image, .. } if *image == feedback
    )));

    let cmd = ctx.run_frame(&mut chain, 1, input);
    assert!(
        !ctx.backend
            .commands(cmd)
            .iter()
            .any(|c| matches!(c, RecordedCommand::ClearImage { .. }))
    );
}

#[test]
fn test_feedback_by_pass_name() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(2);
    chain.set_pass_name(0, "Blur");
    chain.set_shader(0, passthrough());
    chain.set_shader(
        1,
        test_shaders(
            &[("BlurFeedbackSize", "vec4<f32>"), ("BlurSize", "vec4<f32>")],
            &["Source", "BlurFeedback"],
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
    assert!(chain.pass(0).unwrap().feedback_framebuffer().is_some());

    let input = ctx.input_image(ctx.max_input_size);
    ctx.run_frame(&mut chain, 0, input);

    let reflection = chain.pass(1).unwrap().reflection().clone();
    let feedback_size = reflection
        .texture(TextureSemantic::PassFeedback, 0)
        .unwrap()
        .size;
    let output_size = reflection
        .texture(TextureSemantic::PassOutput, 0)
        .unwrap()
        .size;
    let expected = [160.0, 120.0, 1.0 / 160.0, 1.0 / 120.0];
    assert_eq!(ctx.ubo_vec4(&chain, 1, 0, feedback_size), expected);
    assert_eq!(ctx.ubo_vec4(&chain, 1, 0, output_size), expected);
}

#[test]
fn test_final_pass_is_never_a_feedback_source() {
    let ctx = TestContext::new(VIEWPORT, 2);
    let mut chain = ctx.chain(2);
    chain.set_shader(0, passthrough());
    chain.set_shader(1, test_shaders(&[], &["Source", "PassFeedback1"]));
    assert!(matches!(
        chain.init(),
        Err(FilterChainError::Reflection(_))
    ));
    assert_eq!(chain.state(), ChainState::Unconfigured);
}
