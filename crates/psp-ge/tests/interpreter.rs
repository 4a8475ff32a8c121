//! Interpreter-level laws: mirror coherence, diff gating, redundant-write
//! elision, control flow, and the vertex type flush dance.

use std::sync::Arc;

use psp_core::bridge::create_gpu_bridge;
use psp_core::config::Config;
use psp_ge::commands::*;
use psp_ge::vertex::{VTYPE_POS_SHIFT, VTYPE_WEIGHTCOUNT_SHIFT, VTYPE_WEIGHT_SHIFT};
use psp_ge::{DirtyUniforms, DisplayList, GeGpu};
use psp_memory::{MemoryManager, RAM_BASE};

fn cmd(op: u8, payload: u32) -> u32 {
    ((op as u32) << 24) | (payload & 0x00FF_FFFF)
}

fn make_gpu(config: Config) -> (Arc<MemoryManager>, GeGpu) {
    let memory = MemoryManager::new();
    let (_sender, receiver) = create_gpu_bridge();
    let gpu = GeGpu::new(Arc::clone(&memory), &config, receiver);
    (memory, gpu)
}

fn run_program(memory: &MemoryManager, gpu: &mut GeGpu, words: &[u32]) -> DisplayList {
    let list_addr = RAM_BASE + 0x100;
    for (i, word) in words.iter().enumerate() {
        memory.write_u32(list_addr + 4 * i as u32, *word).unwrap();
    }
    let mut list = DisplayList::new(list_addr, words.len() as u32);
    gpu.run_list(&mut list);
    list
}

fn buffer_a_draw(gpu: &mut GeGpu, memory: &MemoryManager) {
    let vertex_addr = RAM_BASE + 0x1000;
    for i in 0..9u32 {
        memory.write_u32(vertex_addr + 4 * i, 0).unwrap();
    }
    let mut list = DisplayList::new(0, 0);
    for word in [
        cmd(GE_CMD_BASE, (vertex_addr >> 8) & 0xFF_0000),
        cmd(GE_CMD_VERTEXTYPE, 3 << VTYPE_POS_SHIFT),
        cmd(GE_CMD_VADDR, vertex_addr & 0xFF_FFFF),
        cmd(GE_CMD_PRIM, (3 << 16) | 3),
    ] {
        gpu.execute_command(&mut list, word);
    }
    assert!(gpu.transform.num_pending() > 0);
}

#[test]
fn test_mirror_coherence_after_any_command() {
    let (memory, mut gpu) = make_gpu(Config::default());

    let cases = [
        (GE_CMD_NOP, 0x000000),
        (GE_CMD_FOGCOLOR, 0x112233),
        (GE_CMD_ZTEST, 0x000004),
        (GE_CMD_DITH0, 0xABCDEF),
        (GE_CMD_SCISSOR2, 0x0449DF),
    ];
    let mut words: Vec<u32> = cases.iter().map(|&(op, p)| cmd(op, p)).collect();
    words.push(cmd(GE_CMD_END, 0));
    run_program(&memory, &mut gpu, &words);

    for &(op, payload) in &cases {
        assert_eq!(
            gpu.state.cmdmem[op as usize],
            ((op as u32) << 24) | payload,
            "mirror slot {:02x}",
            op
        );
    }
}

#[test]
fn test_redundant_write_causes_at_most_one_flush() {
    let (memory, mut gpu) = make_gpu(Config::default());
    buffer_a_draw(&mut gpu, &memory);

    let mut list = DisplayList::new(0, 0);
    // First differing write drains the batch; the identical repeat must
    // not flush again.
    gpu.execute_command(&mut list, cmd(GE_CMD_BLENDMODE, 0x000607));
    gpu.execute_command(&mut list, cmd(GE_CMD_BLENDMODE, 0x000607));
    assert_eq!(gpu.transform.num_flushes(), 1);

    buffer_a_draw(&mut gpu, &memory);
    gpu.execute_command(&mut list, cmd(GE_CMD_BLENDMODE, 0x000607));
    // Still identical to the mirror: the new batch survives.
    assert_eq!(gpu.transform.num_pending(), 1);
    assert_eq!(gpu.transform.num_flushes(), 1);
}

#[test]
fn test_diff_gated_opcode_has_no_effect_without_change() {
    let (memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);

    gpu.execute_command(&mut list, cmd(GE_CMD_FOGCOLOR, 0x445566));
    assert_eq!(gpu.shaders.dirty_count(DirtyUniforms::FOGCOLOR), 1);

    // Same payload again: no observable effect anywhere.
    buffer_a_draw(&mut gpu, &memory);
    gpu.execute_command(&mut list, cmd(GE_CMD_FOGCOLOR, 0x445566));
    assert_eq!(gpu.shaders.dirty_count(DirtyUniforms::FOGCOLOR), 1);
    assert_eq!(gpu.transform.num_pending(), 1);
    assert_eq!(gpu.transform.num_flushes(), 0);
}

#[test]
fn test_downcount_limits_execution() {
    let (memory, mut gpu) = make_gpu(Config::default());
    let words = [
        cmd(GE_CMD_FOGCOLOR, 0x000001),
        cmd(GE_CMD_FOGCOLOR, 0x000002),
        cmd(GE_CMD_FOGCOLOR, 0x000003),
    ];
    let list_addr = RAM_BASE + 0x100;
    for (i, word) in words.iter().enumerate() {
        memory.write_u32(list_addr + 4 * i as u32, *word).unwrap();
    }

    let mut list = DisplayList::new(list_addr, 2);
    gpu.run_list(&mut list);
    assert_eq!(list.downcount, 0);
    assert_eq!(gpu.state.payload(GE_CMD_FOGCOLOR), 0x000002);

    // The list resumes where it stopped.
    list.downcount = 1;
    gpu.run_list(&mut list);
    assert_eq!(gpu.state.payload(GE_CMD_FOGCOLOR), 0x000003);
}

#[test]
fn test_call_and_ret() {
    let (memory, mut gpu) = make_gpu(Config::default());

    let list_addr = RAM_BASE + 0x100;
    let sub_addr = RAM_BASE + 0x200;
    let program = [
        cmd(GE_CMD_BASE, (list_addr >> 8) & 0xFF_0000),
        cmd(GE_CMD_CALL, sub_addr & 0xFF_FFFF),
        cmd(GE_CMD_FOGCOLOR, 0x0000FF),
        cmd(GE_CMD_END, 0),
    ];
    for (i, word) in program.iter().enumerate() {
        memory.write_u32(list_addr + 4 * i as u32, *word).unwrap();
    }
    let subroutine = [cmd(GE_CMD_AMBIENTCOLOR, 0x00FF00), cmd(GE_CMD_RET, 0)];
    for (i, word) in subroutine.iter().enumerate() {
        memory.write_u32(sub_addr + 4 * i as u32, *word).unwrap();
    }

    let mut list = DisplayList::new(list_addr, 16);
    gpu.run_list(&mut list);

    assert!(list.finished);
    // Both the subroutine body and the post-return command ran.
    assert_eq!(gpu.state.payload(GE_CMD_AMBIENTCOLOR), 0x00FF00);
    assert_eq!(gpu.state.payload(GE_CMD_FOGCOLOR), 0x0000FF);
    assert_eq!(list.stack_ptr, 0);
}

#[test]
fn test_jump_redirects_stream() {
    let (memory, mut gpu) = make_gpu(Config::default());

    let list_addr = RAM_BASE + 0x100;
    let target = RAM_BASE + 0x300;
    let program = [
        cmd(GE_CMD_BASE, (list_addr >> 8) & 0xFF_0000),
        cmd(GE_CMD_JUMP, target & 0xFF_FFFF),
        // Must be skipped.
        cmd(GE_CMD_FOGCOLOR, 0xBADBAD),
    ];
    for (i, word) in program.iter().enumerate() {
        memory.write_u32(list_addr + 4 * i as u32, *word).unwrap();
    }
    let landing = [cmd(GE_CMD_FOGCOLOR, 0x00CAFE), cmd(GE_CMD_END, 0)];
    for (i, word) in landing.iter().enumerate() {
        memory.write_u32(target + 4 * i as u32, *word).unwrap();
    }

    let mut list = DisplayList::new(list_addr, 16);
    gpu.run_list(&mut list);
    assert_eq!(gpu.state.payload(GE_CMD_FOGCOLOR), 0x00CAFE);
}

#[test]
fn test_vertex_type_weight_count_only_change_keeps_batch() {
    let mut config = Config::default();
    config.gpu.software_skinning = true;
    let (memory, mut gpu) = make_gpu(config);

    let base_vtype = (3 << VTYPE_POS_SHIFT) | (1 << VTYPE_WEIGHT_SHIFT);
    let mut list = DisplayList::new(0, 0);
    gpu.execute_command(&mut list, cmd(GE_CMD_VERTEXTYPE, base_vtype));
    buffer_a_draw_with_vtype(&mut gpu, &memory, base_vtype);

    // Only the weight count changes: the batch must survive.
    let weights_vtype = base_vtype | (3 << VTYPE_WEIGHTCOUNT_SHIFT);
    gpu.execute_command(&mut list, cmd(GE_CMD_VERTEXTYPE, weights_vtype));
    assert_eq!(gpu.transform.num_flushes(), 0);
    assert_eq!(gpu.transform.num_pending(), 1);

    // A position format change breaks it.
    let pos_vtype = (2 << VTYPE_POS_SHIFT) | (1 << VTYPE_WEIGHT_SHIFT);
    gpu.execute_command(&mut list, cmd(GE_CMD_VERTEXTYPE, pos_vtype));
    assert_eq!(gpu.transform.num_flushes(), 1);
    assert_eq!(gpu.transform.num_pending(), 0);
    // The new value stuck after the restore/flush/reapply dance.
    assert_eq!(gpu.state.vertex_type(), pos_vtype);
}

fn buffer_a_draw_with_vtype(gpu: &mut GeGpu, memory: &MemoryManager, vtype: u32) {
    let vertex_addr = RAM_BASE + 0x1000;
    for i in 0..32u32 {
        memory.write_u32(vertex_addr + 4 * i, 0).unwrap();
    }
    let mut list = DisplayList::new(0, 0);
    for word in [
        cmd(GE_CMD_BASE, (vertex_addr >> 8) & 0xFF_0000),
        cmd(GE_CMD_VERTEXTYPE, vtype),
        cmd(GE_CMD_VADDR, vertex_addr & 0xFF_FFFF),
        cmd(GE_CMD_PRIM, (3 << 16) | 3),
    ] {
        gpu.execute_command(&mut list, word);
    }
    assert!(gpu.transform.num_pending() > 0);
}

#[test]
fn test_bad_vertex_address_skips_draw() {
    let (_memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);

    // VADDR resolves to unmapped memory; PRIM must skip quietly.
    for word in [
        cmd(GE_CMD_VERTEXTYPE, 3 << VTYPE_POS_SHIFT),
        cmd(GE_CMD_VADDR, 0x000010),
        cmd(GE_CMD_PRIM, (3 << 16) | 3),
    ] {
        gpu.execute_command(&mut list, word);
    }
    assert_eq!(gpu.transform.num_pending(), 0);
}

#[test]
fn test_prim_count_zero_is_a_nop() {
    let (_memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);
    gpu.execute_command(&mut list, cmd(GE_CMD_PRIM, 3 << 16));
    assert_eq!(gpu.transform.num_pending(), 0);
    assert_eq!(gpu.cycles_executed, 0);
}

#[test]
fn test_vaddr_uses_base_and_offset() {
    let (_memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);

    for word in [
        cmd(GE_CMD_BASE, 0x08_0000),
        cmd(GE_CMD_OFFSETADDR, 0x000010),
        cmd(GE_CMD_VADDR, 0x001000),
    ] {
        gpu.execute_command(&mut list, word);
    }
    assert_eq!(gpu.ctx.vertex_addr, 0x0800_2000);
}

#[test]
fn test_morph_weights_decode() {
    let (_memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);

    gpu.execute_command(&mut list, cmd(GE_CMD_MORPHWEIGHT0, 0x3F_8000));
    gpu.execute_command(&mut list, cmd(GE_CMD_MORPHWEIGHT7, 0xBF_8000));
    assert_eq!(gpu.ctx.morph_weights[0], 1.0);
    assert_eq!(gpu.ctx.morph_weights[7], -1.0);
}

#[test]
fn test_light_state_decodes_and_dirties() {
    let (_memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);

    // Light 2 position.z, spot coefficient, and diffuse color.
    gpu.execute_command(&mut list, cmd(GE_CMD_LZ2, 0x40_0000));
    gpu.execute_command(&mut list, cmd(GE_CMD_LKS2, 0x3F_8000));
    gpu.execute_command(&mut list, cmd(GE_CMD_LDC2, 0x00_80FF));

    assert_eq!(gpu.ctx.lights[2].pos[2], 2.0);
    assert_eq!(gpu.ctx.lights[2].spot_coef, 1.0);
    let diffuse = gpu.ctx.lights[2].color[1];
    assert!((diffuse[0] - 1.0).abs() < 1e-6);
    assert!((diffuse[1] - 128.0 / 255.0).abs() < 1e-6);
    assert!((diffuse[2] - 0.0).abs() < 1e-6);
    assert_eq!(gpu.shaders.dirty_count(DirtyUniforms::LIGHT2), 3);
    assert_eq!(gpu.shaders.dirty_count(DirtyUniforms::LIGHT0), 0);
}

#[test]
fn test_texsize_respects_render_to_texture_override() {
    let (_memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);

    gpu.execute_command(&mut list, cmd(GE_CMD_TEXSIZE0, (8 << 8) | 9));
    assert_eq!(gpu.ctx.cur_texture_width, 512);
    assert_eq!(gpu.ctx.cur_texture_height, 256);

    // A render-to-texture override installed its own size; an unchanged
    // TEXSIZE0 with a clean texture must not clobber it.
    gpu.ctx.texture_changed = false;
    gpu.ctx.cur_texture_width = 480;
    gpu.ctx.cur_texture_height = 272;
    gpu.execute_command(&mut list, cmd(GE_CMD_TEXSIZE0, (8 << 8) | 9));
    assert_eq!(gpu.ctx.cur_texture_width, 480);
    assert_eq!(gpu.ctx.cur_texture_height, 272);

    // But a real change recomputes.
    gpu.execute_command(&mut list, cmd(GE_CMD_TEXSIZE0, (7 << 8) | 8));
    assert_eq!(gpu.ctx.cur_texture_width, 256);
    assert_eq!(gpu.ctx.cur_texture_height, 128);
}

#[test]
fn test_loadclut_reads_palette() {
    let (memory, mut gpu) = make_gpu(Config::default());
    let mut list = DisplayList::new(0, 0);

    let clut_addr = RAM_BASE + 0x4000;
    memory.write_bytes(clut_addr, &[0xCD; 64]).unwrap();

    gpu.execute_command(&mut list, cmd(GE_CMD_CLUTADDR, clut_addr & 0xFF_FFFF));
    gpu.execute_command(&mut list, cmd(GE_CMD_CLUTADDRUPPER, (clut_addr >> 8) & 0xFF_0000));
    gpu.execute_command(&mut list, cmd(GE_CMD_LOADCLUT, 2));

    assert_eq!(&gpu.textures.clut()[..4], &[0xCD; 4]);
    assert!(gpu.ctx.texture_changed);
}
