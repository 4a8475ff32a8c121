//! Oxidized-PSP - PSP GE emulator core
//!
//! Main entry point. Without a frontend wired up yet, this runs a small
//! built-in display list through the interpreter as a smoke check and
//! prints the resulting statistics.

use psp_core::bridge::{create_gpu_bridge, GpuEvent};
use psp_core::config::Config;
use psp_ge::{DisplayList, GeGpu};
use psp_memory::{MemoryManager, RAM_BASE};

/// Assemble a GE command word.
fn cmd(op: u8, payload: u32) -> u32 {
    ((op as u32) << 24) | (payload & 0x00FF_FFFF)
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Oxidized-PSP GE core");

    let config = Config::default();
    let memory = MemoryManager::new();
    let (sender, receiver) = create_gpu_bridge();
    let mut gpu = GeGpu::new(memory.clone(), &config, receiver);

    // A tiny display list: one triangle of float vertices, then END.
    use psp_ge::commands::*;
    let vertex_addr = RAM_BASE + 0x1000;
    let vtype = 3 << 7; // float positions
    let vertices: [f32; 9] = [
        0.0, 0.0, 0.0, //
        64.0, 0.0, 0.0, //
        0.0, 64.0, 0.0,
    ];
    for (i, v) in vertices.iter().enumerate() {
        memory
            .write_u32(vertex_addr + 4 * i as u32, v.to_bits())
            .expect("vertex upload");
    }

    let list_addr = RAM_BASE + 0x100;
    let program = [
        cmd(GE_CMD_NOP, 0),
        cmd(GE_CMD_BASE, (vertex_addr >> 8) & 0x00FF_0000),
        cmd(GE_CMD_VERTEXTYPE, vtype),
        cmd(GE_CMD_VADDR, vertex_addr & 0x00FF_FFFF),
        cmd(GE_CMD_PRIM, (3 << 16) | 3),
        cmd(GE_CMD_FINISH, 0),
        cmd(GE_CMD_END, 0),
    ];
    for (i, word) in program.iter().enumerate() {
        memory
            .write_u32(list_addr + 4 * i as u32, *word)
            .expect("display list upload");
    }

    sender.post(GpuEvent::BeginFrame);

    let mut list = DisplayList::new(list_addr, program.len() as u32);
    gpu.run_list(&mut list);

    sender.post(GpuEvent::CopyDisplayToOutput);
    gpu.process_pending_events();

    gpu.update_stats();
    tracing::info!(
        "Smoke list done: {} draw call(s), {} flush(es), {} cycles",
        gpu.stats.num_draw_calls,
        gpu.stats.num_flushes,
        gpu.cycles_executed
    );
}
