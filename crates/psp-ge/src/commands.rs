//! GE command opcodes and the per-opcode flag table
//!
//! Every 32-bit command word carries its opcode in the top byte. The flag
//! table drives the interpreter's hot loop: it decides, per opcode, whether
//! buffered draws must be flushed before the register write and whether the
//! executor needs to run at all.

use bitflags::bitflags;
use psp_core::config::GpuConfig;

// Control flow and draw triggers
pub const GE_CMD_NOP: u8 = 0x00;
pub const GE_CMD_VADDR: u8 = 0x01;
pub const GE_CMD_IADDR: u8 = 0x02;
pub const GE_CMD_UNKNOWN_03: u8 = 0x03;
pub const GE_CMD_PRIM: u8 = 0x04;
pub const GE_CMD_BEZIER: u8 = 0x05;
pub const GE_CMD_SPLINE: u8 = 0x06;
pub const GE_CMD_BOUNDINGBOX: u8 = 0x07;
pub const GE_CMD_JUMP: u8 = 0x08;
pub const GE_CMD_BJUMP: u8 = 0x09;
pub const GE_CMD_CALL: u8 = 0x0A;
pub const GE_CMD_RET: u8 = 0x0B;
pub const GE_CMD_END: u8 = 0x0C;
pub const GE_CMD_UNKNOWN_0D: u8 = 0x0D;
pub const GE_CMD_SIGNAL: u8 = 0x0E;
pub const GE_CMD_FINISH: u8 = 0x0F;

// Addressing and vertex setup
pub const GE_CMD_BASE: u8 = 0x10;
pub const GE_CMD_UNKNOWN_11: u8 = 0x11;
pub const GE_CMD_VERTEXTYPE: u8 = 0x12;
pub const GE_CMD_OFFSETADDR: u8 = 0x13;
pub const GE_CMD_ORIGIN: u8 = 0x14;
pub const GE_CMD_REGION1: u8 = 0x15;
pub const GE_CMD_REGION2: u8 = 0x16;

// Feature enables
pub const GE_CMD_LIGHTINGENABLE: u8 = 0x17;
pub const GE_CMD_LIGHTENABLE0: u8 = 0x18;
pub const GE_CMD_LIGHTENABLE1: u8 = 0x19;
pub const GE_CMD_LIGHTENABLE2: u8 = 0x1A;
pub const GE_CMD_LIGHTENABLE3: u8 = 0x1B;
pub const GE_CMD_CLIPENABLE: u8 = 0x1C;
pub const GE_CMD_CULLFACEENABLE: u8 = 0x1D;
pub const GE_CMD_TEXTUREMAPENABLE: u8 = 0x1E;
pub const GE_CMD_FOGENABLE: u8 = 0x1F;
pub const GE_CMD_DITHERENABLE: u8 = 0x20;
pub const GE_CMD_ALPHABLENDENABLE: u8 = 0x21;
pub const GE_CMD_ALPHATESTENABLE: u8 = 0x22;
pub const GE_CMD_ZTESTENABLE: u8 = 0x23;
pub const GE_CMD_STENCILTESTENABLE: u8 = 0x24;
pub const GE_CMD_ANTIALIASENABLE: u8 = 0x25;
pub const GE_CMD_PATCHCULLENABLE: u8 = 0x26;
pub const GE_CMD_COLORTESTENABLE: u8 = 0x27;
pub const GE_CMD_LOGICOPENABLE: u8 = 0x28;
pub const GE_CMD_UNKNOWN_29: u8 = 0x29;

// Matrix uploads and morphing
pub const GE_CMD_BONEMATRIXNUMBER: u8 = 0x2A;
pub const GE_CMD_BONEMATRIXDATA: u8 = 0x2B;
pub const GE_CMD_MORPHWEIGHT0: u8 = 0x2C;
pub const GE_CMD_MORPHWEIGHT1: u8 = 0x2D;
pub const GE_CMD_MORPHWEIGHT2: u8 = 0x2E;
pub const GE_CMD_MORPHWEIGHT3: u8 = 0x2F;
pub const GE_CMD_MORPHWEIGHT4: u8 = 0x30;
pub const GE_CMD_MORPHWEIGHT5: u8 = 0x31;
pub const GE_CMD_MORPHWEIGHT6: u8 = 0x32;
pub const GE_CMD_MORPHWEIGHT7: u8 = 0x33;
pub const GE_CMD_UNKNOWN_34: u8 = 0x34;
pub const GE_CMD_UNKNOWN_35: u8 = 0x35;
pub const GE_CMD_PATCHDIVISION: u8 = 0x36;
pub const GE_CMD_PATCHPRIMITIVE: u8 = 0x37;
pub const GE_CMD_PATCHFACING: u8 = 0x38;
pub const GE_CMD_UNKNOWN_39: u8 = 0x39;
pub const GE_CMD_WORLDMATRIXNUMBER: u8 = 0x3A;
pub const GE_CMD_WORLDMATRIXDATA: u8 = 0x3B;
pub const GE_CMD_VIEWMATRIXNUMBER: u8 = 0x3C;
pub const GE_CMD_VIEWMATRIXDATA: u8 = 0x3D;
pub const GE_CMD_PROJMATRIXNUMBER: u8 = 0x3E;
pub const GE_CMD_PROJMATRIXDATA: u8 = 0x3F;
pub const GE_CMD_TGENMATRIXNUMBER: u8 = 0x40;
pub const GE_CMD_TGENMATRIXDATA: u8 = 0x41;

// Viewport and texture coordinates
pub const GE_CMD_VIEWPORTX1: u8 = 0x42;
pub const GE_CMD_VIEWPORTY1: u8 = 0x43;
pub const GE_CMD_VIEWPORTZ1: u8 = 0x44;
pub const GE_CMD_VIEWPORTX2: u8 = 0x45;
pub const GE_CMD_VIEWPORTY2: u8 = 0x46;
pub const GE_CMD_VIEWPORTZ2: u8 = 0x47;
pub const GE_CMD_TEXSCALEU: u8 = 0x48;
pub const GE_CMD_TEXSCALEV: u8 = 0x49;
pub const GE_CMD_TEXOFFSETU: u8 = 0x4A;
pub const GE_CMD_TEXOFFSETV: u8 = 0x4B;
pub const GE_CMD_OFFSETX: u8 = 0x4C;
pub const GE_CMD_OFFSETY: u8 = 0x4D;
pub const GE_CMD_UNKNOWN_4E: u8 = 0x4E;
pub const GE_CMD_UNKNOWN_4F: u8 = 0x4F;

// Shading and materials
pub const GE_CMD_SHADEMODE: u8 = 0x50;
pub const GE_CMD_REVERSENORMAL: u8 = 0x51;
pub const GE_CMD_UNKNOWN_52: u8 = 0x52;
pub const GE_CMD_MATERIALUPDATE: u8 = 0x53;
pub const GE_CMD_MATERIALEMISSIVE: u8 = 0x54;
pub const GE_CMD_MATERIALAMBIENT: u8 = 0x55;
pub const GE_CMD_MATERIALDIFFUSE: u8 = 0x56;
pub const GE_CMD_MATERIALSPECULAR: u8 = 0x57;
pub const GE_CMD_MATERIALALPHA: u8 = 0x58;
pub const GE_CMD_UNKNOWN_59: u8 = 0x59;
pub const GE_CMD_UNKNOWN_5A: u8 = 0x5A;
pub const GE_CMD_MATERIALSPECULARCOEF: u8 = 0x5B;
pub const GE_CMD_AMBIENTCOLOR: u8 = 0x5C;
pub const GE_CMD_AMBIENTALPHA: u8 = 0x5D;
pub const GE_CMD_LIGHTMODE: u8 = 0x5E;

// Lights: type, position, direction, attenuation, spot, colors
pub const GE_CMD_LIGHTTYPE0: u8 = 0x5F;
pub const GE_CMD_LIGHTTYPE1: u8 = 0x60;
pub const GE_CMD_LIGHTTYPE2: u8 = 0x61;
pub const GE_CMD_LIGHTTYPE3: u8 = 0x62;
pub const GE_CMD_LX0: u8 = 0x63;
pub const GE_CMD_LY0: u8 = 0x64;
pub const GE_CMD_LZ0: u8 = 0x65;
pub const GE_CMD_LX1: u8 = 0x66;
pub const GE_CMD_LY1: u8 = 0x67;
pub const GE_CMD_LZ1: u8 = 0x68;
pub const GE_CMD_LX2: u8 = 0x69;
pub const GE_CMD_LY2: u8 = 0x6A;
pub const GE_CMD_LZ2: u8 = 0x6B;
pub const GE_CMD_LX3: u8 = 0x6C;
pub const GE_CMD_LY3: u8 = 0x6D;
pub const GE_CMD_LZ3: u8 = 0x6E;
pub const GE_CMD_LDX0: u8 = 0x6F;
pub const GE_CMD_LDY0: u8 = 0x70;
pub const GE_CMD_LDZ0: u8 = 0x71;
pub const GE_CMD_LDX1: u8 = 0x72;
pub const GE_CMD_LDY1: u8 = 0x73;
pub const GE_CMD_LDZ1: u8 = 0x74;
pub const GE_CMD_LDX2: u8 = 0x75;
pub const GE_CMD_LDY2: u8 = 0x76;
pub const GE_CMD_LDZ2: u8 = 0x77;
pub const GE_CMD_LDX3: u8 = 0x78;
pub const GE_CMD_LDY3: u8 = 0x79;
pub const GE_CMD_LDZ3: u8 = 0x7A;
pub const GE_CMD_LKA0: u8 = 0x7B;
pub const GE_CMD_LKB0: u8 = 0x7C;
pub const GE_CMD_LKC0: u8 = 0x7D;
pub const GE_CMD_LKA1: u8 = 0x7E;
pub const GE_CMD_LKB1: u8 = 0x7F;
pub const GE_CMD_LKC1: u8 = 0x80;
pub const GE_CMD_LKA2: u8 = 0x81;
pub const GE_CMD_LKB2: u8 = 0x82;
pub const GE_CMD_LKC2: u8 = 0x83;
pub const GE_CMD_LKA3: u8 = 0x84;
pub const GE_CMD_LKB3: u8 = 0x85;
pub const GE_CMD_LKC3: u8 = 0x86;
pub const GE_CMD_LKS0: u8 = 0x87;
pub const GE_CMD_LKS1: u8 = 0x88;
pub const GE_CMD_LKS2: u8 = 0x89;
pub const GE_CMD_LKS3: u8 = 0x8A;
pub const GE_CMD_LKO0: u8 = 0x8B;
pub const GE_CMD_LKO1: u8 = 0x8C;
pub const GE_CMD_LKO2: u8 = 0x8D;
pub const GE_CMD_LKO3: u8 = 0x8E;
pub const GE_CMD_LAC0: u8 = 0x8F;
pub const GE_CMD_LDC0: u8 = 0x90;
pub const GE_CMD_LSC0: u8 = 0x91;
pub const GE_CMD_LAC1: u8 = 0x92;
pub const GE_CMD_LDC1: u8 = 0x93;
pub const GE_CMD_LSC1: u8 = 0x94;
pub const GE_CMD_LAC2: u8 = 0x95;
pub const GE_CMD_LDC2: u8 = 0x96;
pub const GE_CMD_LSC2: u8 = 0x97;
pub const GE_CMD_LAC3: u8 = 0x98;
pub const GE_CMD_LDC3: u8 = 0x99;
pub const GE_CMD_LSC3: u8 = 0x9A;

// Framebuffer and texture pointers
pub const GE_CMD_CULL: u8 = 0x9B;
pub const GE_CMD_FRAMEBUFPTR: u8 = 0x9C;
pub const GE_CMD_FRAMEBUFWIDTH: u8 = 0x9D;
pub const GE_CMD_ZBUFPTR: u8 = 0x9E;
pub const GE_CMD_ZBUFWIDTH: u8 = 0x9F;
pub const GE_CMD_TEXADDR0: u8 = 0xA0;
pub const GE_CMD_TEXADDR1: u8 = 0xA1;
pub const GE_CMD_TEXADDR2: u8 = 0xA2;
pub const GE_CMD_TEXADDR3: u8 = 0xA3;
pub const GE_CMD_TEXADDR4: u8 = 0xA4;
pub const GE_CMD_TEXADDR5: u8 = 0xA5;
pub const GE_CMD_TEXADDR6: u8 = 0xA6;
pub const GE_CMD_TEXADDR7: u8 = 0xA7;
pub const GE_CMD_TEXBUFWIDTH0: u8 = 0xA8;
pub const GE_CMD_TEXBUFWIDTH1: u8 = 0xA9;
pub const GE_CMD_TEXBUFWIDTH2: u8 = 0xAA;
pub const GE_CMD_TEXBUFWIDTH3: u8 = 0xAB;
pub const GE_CMD_TEXBUFWIDTH4: u8 = 0xAC;
pub const GE_CMD_TEXBUFWIDTH5: u8 = 0xAD;
pub const GE_CMD_TEXBUFWIDTH6: u8 = 0xAE;
pub const GE_CMD_TEXBUFWIDTH7: u8 = 0xAF;
pub const GE_CMD_CLUTADDR: u8 = 0xB0;
pub const GE_CMD_CLUTADDRUPPER: u8 = 0xB1;

// Block transfer registers
pub const GE_CMD_TRANSFERSRC: u8 = 0xB2;
pub const GE_CMD_TRANSFERSRCW: u8 = 0xB3;
pub const GE_CMD_TRANSFERDST: u8 = 0xB4;
pub const GE_CMD_TRANSFERDSTW: u8 = 0xB5;
pub const GE_CMD_UNKNOWN_B6: u8 = 0xB6;
pub const GE_CMD_UNKNOWN_B7: u8 = 0xB7;

// Texture sampling state
pub const GE_CMD_TEXSIZE0: u8 = 0xB8;
pub const GE_CMD_TEXSIZE1: u8 = 0xB9;
pub const GE_CMD_TEXSIZE2: u8 = 0xBA;
pub const GE_CMD_TEXSIZE3: u8 = 0xBB;
pub const GE_CMD_TEXSIZE4: u8 = 0xBC;
pub const GE_CMD_TEXSIZE5: u8 = 0xBD;
pub const GE_CMD_TEXSIZE6: u8 = 0xBE;
pub const GE_CMD_TEXSIZE7: u8 = 0xBF;
pub const GE_CMD_TEXMAPMODE: u8 = 0xC0;
pub const GE_CMD_TEXSHADELS: u8 = 0xC1;
pub const GE_CMD_TEXMODE: u8 = 0xC2;
pub const GE_CMD_TEXFORMAT: u8 = 0xC3;
pub const GE_CMD_LOADCLUT: u8 = 0xC4;
pub const GE_CMD_CLUTFORMAT: u8 = 0xC5;
pub const GE_CMD_TEXFILTER: u8 = 0xC6;
pub const GE_CMD_TEXWRAP: u8 = 0xC7;
pub const GE_CMD_TEXLEVEL: u8 = 0xC8;
pub const GE_CMD_TEXFUNC: u8 = 0xC9;
pub const GE_CMD_TEXENVCOLOR: u8 = 0xCA;
pub const GE_CMD_TEXFLUSH: u8 = 0xCB;
pub const GE_CMD_TEXSYNC: u8 = 0xCC;

// Fog
pub const GE_CMD_FOG1: u8 = 0xCD;
pub const GE_CMD_FOG2: u8 = 0xCE;
pub const GE_CMD_FOGCOLOR: u8 = 0xCF;
pub const GE_CMD_TEXLODSLOPE: u8 = 0xD0;
pub const GE_CMD_UNKNOWN_D1: u8 = 0xD1;

// Render state
pub const GE_CMD_FRAMEBUFPIXFORMAT: u8 = 0xD2;
pub const GE_CMD_CLEARMODE: u8 = 0xD3;
pub const GE_CMD_SCISSOR1: u8 = 0xD4;
pub const GE_CMD_SCISSOR2: u8 = 0xD5;
pub const GE_CMD_MINZ: u8 = 0xD6;
pub const GE_CMD_MAXZ: u8 = 0xD7;
pub const GE_CMD_COLORTEST: u8 = 0xD8;
pub const GE_CMD_COLORREF: u8 = 0xD9;
pub const GE_CMD_COLORTESTMASK: u8 = 0xDA;
pub const GE_CMD_ALPHATEST: u8 = 0xDB;
pub const GE_CMD_STENCILTEST: u8 = 0xDC;
pub const GE_CMD_STENCILOP: u8 = 0xDD;
pub const GE_CMD_ZTEST: u8 = 0xDE;
pub const GE_CMD_BLENDMODE: u8 = 0xDF;
pub const GE_CMD_BLENDFIXEDA: u8 = 0xE0;
pub const GE_CMD_BLENDFIXEDB: u8 = 0xE1;
pub const GE_CMD_DITH0: u8 = 0xE2;
pub const GE_CMD_DITH1: u8 = 0xE3;
pub const GE_CMD_DITH2: u8 = 0xE4;
pub const GE_CMD_DITH3: u8 = 0xE5;
pub const GE_CMD_LOGICOP: u8 = 0xE6;
pub const GE_CMD_ZWRITEDISABLE: u8 = 0xE7;
pub const GE_CMD_MASKRGB: u8 = 0xE8;
pub const GE_CMD_MASKALPHA: u8 = 0xE9;

// Block transfer trigger and position/size
pub const GE_CMD_TRANSFERSTART: u8 = 0xEA;
pub const GE_CMD_TRANSFERSRCPOS: u8 = 0xEB;
pub const GE_CMD_TRANSFERDSTPOS: u8 = 0xEC;
pub const GE_CMD_UNKNOWN_ED: u8 = 0xED;
pub const GE_CMD_TRANSFERSIZE: u8 = 0xEE;
pub const GE_CMD_UNKNOWN_EF: u8 = 0xEF;

// 0xF0..0xFF never appear in display lists from well-behaved games
pub const GE_CMD_UNKNOWN_F0: u8 = 0xF0;
pub const GE_CMD_UNKNOWN_FF: u8 = 0xFF;

bitflags! {
    /// Per-opcode interpreter behavior
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandFlags: u8 {
        /// Always flush buffered draws before this command.
        const FLUSH_BEFORE = 1;
        /// Flush only when the payload differs from the mirrored value.
        const FLUSH_BEFORE_ON_CHANGE = 2;
        /// Always run the executor.
        const EXECUTE = 4;
        /// Run the executor only when the payload differs.
        const EXECUTE_ON_CHANGE = 8;
        /// Union tested by the hot loop with a single branch.
        const ANY_EXECUTE = 4 | 8;
    }
}

// Shorthand for the seed table below.
const FB: u8 = CommandFlags::FLUSH_BEFORE.bits();
const FBC: u8 = CommandFlags::FLUSH_BEFORE_ON_CHANGE.bits();
const EX: u8 = CommandFlags::EXECUTE.bits();
const EXC: u8 = CommandFlags::EXECUTE_ON_CHANGE.bits();

/// Static seed for the flag table. Every opcode the hardware recognizes
/// appears exactly once; a duplicate is a construction-time error.
static COMMAND_TABLE: &[(u8, u8)] = &[
    // Changes that dirty the framebuffer
    (GE_CMD_FRAMEBUFPTR, FBC | EX),
    (GE_CMD_FRAMEBUFWIDTH, FBC | EX),
    (GE_CMD_FRAMEBUFPIXFORMAT, FBC | EX),
    (GE_CMD_ZBUFPTR, FBC),
    (GE_CMD_ZBUFWIDTH, FBC),
    // Changes that dirty uniforms
    (GE_CMD_FOGCOLOR, FBC | EXC),
    (GE_CMD_FOG1, FBC | EXC),
    (GE_CMD_FOG2, FBC | EXC),
    (GE_CMD_MINZ, FBC),
    (GE_CMD_MAXZ, FBC),
    // Changes that dirty texture scaling
    (GE_CMD_TEXMAPMODE, FBC | EXC),
    (GE_CMD_TEXSCALEU, FBC | EXC),
    (GE_CMD_TEXSCALEV, FBC | EXC),
    (GE_CMD_TEXOFFSETU, FBC | EXC),
    (GE_CMD_TEXOFFSETV, FBC | EXC),
    // Changes that dirty the current texture
    (GE_CMD_TEXSIZE0, FBC | EXC),
    (GE_CMD_TEXSIZE1, FBC | EXC),
    (GE_CMD_TEXSIZE2, FBC | EXC),
    (GE_CMD_TEXSIZE3, FBC | EXC),
    (GE_CMD_TEXSIZE4, FBC | EXC),
    (GE_CMD_TEXSIZE5, FBC | EXC),
    (GE_CMD_TEXSIZE6, FBC | EXC),
    (GE_CMD_TEXSIZE7, FBC | EXC),
    (GE_CMD_TEXFORMAT, FBC | EXC),
    (GE_CMD_TEXADDR0, FBC | EXC),
    (GE_CMD_TEXADDR1, FBC | EXC),
    (GE_CMD_TEXADDR2, FBC | EXC),
    (GE_CMD_TEXADDR3, FBC | EXC),
    (GE_CMD_TEXADDR4, FBC | EXC),
    (GE_CMD_TEXADDR5, FBC | EXC),
    (GE_CMD_TEXADDR6, FBC | EXC),
    (GE_CMD_TEXADDR7, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH0, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH1, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH2, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH3, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH4, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH5, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH6, FBC | EXC),
    (GE_CMD_TEXBUFWIDTH7, FBC | EXC),
    (GE_CMD_CLUTADDR, FBC | EX),
    (GE_CMD_CLUTADDRUPPER, FBC | EX),
    (GE_CMD_CLUTFORMAT, FBC | EX),
    // These affect the fragment shader
    (GE_CMD_CLEARMODE, FBC),
    (GE_CMD_TEXTUREMAPENABLE, FBC | EXC),
    (GE_CMD_FOGENABLE, FBC),
    (GE_CMD_TEXMODE, FBC | EXC),
    (GE_CMD_TEXSHADELS, FBC),
    (GE_CMD_SHADEMODE, FBC),
    (GE_CMD_TEXFUNC, FBC),
    (GE_CMD_COLORTEST, FBC | EXC),
    (GE_CMD_ALPHATESTENABLE, FBC),
    (GE_CMD_COLORTESTENABLE, FBC),
    (GE_CMD_COLORTESTMASK, FBC | EXC),
    // These change the vertex shader
    (GE_CMD_REVERSENORMAL, FBC),
    (GE_CMD_LIGHTINGENABLE, FBC),
    (GE_CMD_LIGHTENABLE0, FBC),
    (GE_CMD_LIGHTENABLE1, FBC),
    (GE_CMD_LIGHTENABLE2, FBC),
    (GE_CMD_LIGHTENABLE3, FBC),
    (GE_CMD_LIGHTTYPE0, FBC),
    (GE_CMD_LIGHTTYPE1, FBC),
    (GE_CMD_LIGHTTYPE2, FBC),
    (GE_CMD_LIGHTTYPE3, FBC),
    (GE_CMD_MATERIALUPDATE, FBC),
    // This changes both shaders
    (GE_CMD_LIGHTMODE, FBC),
    (GE_CMD_TEXFILTER, FBC | EXC),
    (GE_CMD_TEXWRAP, FBC | EXC),
    // Uniform changes
    (GE_CMD_ALPHATEST, FBC | EXC),
    (GE_CMD_COLORREF, FBC | EXC),
    (GE_CMD_TEXENVCOLOR, FBC | EXC),
    // Simple render state changes
    (GE_CMD_OFFSETX, FBC),
    (GE_CMD_OFFSETY, FBC),
    (GE_CMD_CULL, FBC),
    (GE_CMD_CULLFACEENABLE, FBC),
    (GE_CMD_DITHERENABLE, FBC),
    (GE_CMD_STENCILOP, FBC),
    (GE_CMD_STENCILTEST, FBC | EXC),
    (GE_CMD_STENCILTESTENABLE, FBC),
    (GE_CMD_ALPHABLENDENABLE, FBC),
    (GE_CMD_BLENDMODE, FBC),
    (GE_CMD_BLENDFIXEDA, FBC),
    (GE_CMD_BLENDFIXEDB, FBC),
    (GE_CMD_MASKRGB, FBC),
    (GE_CMD_MASKALPHA, FBC),
    (GE_CMD_ZTEST, FBC),
    (GE_CMD_ZTESTENABLE, FBC),
    (GE_CMD_ZWRITEDISABLE, FBC),
    // Flush conservatively on both; the draw engine ignores unsupported ops.
    (GE_CMD_LOGICOP, FBC),
    (GE_CMD_LOGICOPENABLE, FBC),
    (GE_CMD_ANTIALIASENABLE, FBC | EX),
    // Morph weights
    (GE_CMD_MORPHWEIGHT0, FBC | EXC),
    (GE_CMD_MORPHWEIGHT1, FBC | EXC),
    (GE_CMD_MORPHWEIGHT2, FBC | EXC),
    (GE_CMD_MORPHWEIGHT3, FBC | EXC),
    (GE_CMD_MORPHWEIGHT4, FBC | EXC),
    (GE_CMD_MORPHWEIGHT5, FBC | EXC),
    (GE_CMD_MORPHWEIGHT6, FBC | EXC),
    (GE_CMD_MORPHWEIGHT7, FBC | EXC),
    // Spline/bezier patch control
    (GE_CMD_PATCHDIVISION, FBC),
    (GE_CMD_PATCHPRIMITIVE, FBC),
    (GE_CMD_PATCHFACING, FBC),
    (GE_CMD_PATCHCULLENABLE, FBC),
    // Viewport
    (GE_CMD_VIEWPORTX1, FBC | EXC),
    (GE_CMD_VIEWPORTY1, FBC | EXC),
    (GE_CMD_VIEWPORTX2, FBC | EXC),
    (GE_CMD_VIEWPORTY2, FBC | EXC),
    (GE_CMD_VIEWPORTZ1, FBC | EXC),
    (GE_CMD_VIEWPORTZ2, FBC | EXC),
    // Region
    (GE_CMD_REGION1, FBC | EXC),
    (GE_CMD_REGION2, FBC | EXC),
    // Scissor
    (GE_CMD_SCISSOR1, FBC | EXC),
    (GE_CMD_SCISSOR2, FBC | EXC),
    // These dirty various vertex shader uniforms
    (GE_CMD_AMBIENTCOLOR, FBC | EXC),
    (GE_CMD_AMBIENTALPHA, FBC | EXC),
    (GE_CMD_MATERIALDIFFUSE, FBC | EXC),
    (GE_CMD_MATERIALEMISSIVE, FBC | EXC),
    (GE_CMD_MATERIALAMBIENT, FBC | EXC),
    (GE_CMD_MATERIALALPHA, FBC | EXC),
    (GE_CMD_MATERIALSPECULAR, FBC | EXC),
    (GE_CMD_MATERIALSPECULARCOEF, FBC | EXC),
    // Light positions, directions, attenuation: precompute a float each
    (GE_CMD_LX0, FBC | EXC),
    (GE_CMD_LY0, FBC | EXC),
    (GE_CMD_LZ0, FBC | EXC),
    (GE_CMD_LX1, FBC | EXC),
    (GE_CMD_LY1, FBC | EXC),
    (GE_CMD_LZ1, FBC | EXC),
    (GE_CMD_LX2, FBC | EXC),
    (GE_CMD_LY2, FBC | EXC),
    (GE_CMD_LZ2, FBC | EXC),
    (GE_CMD_LX3, FBC | EXC),
    (GE_CMD_LY3, FBC | EXC),
    (GE_CMD_LZ3, FBC | EXC),
    (GE_CMD_LDX0, FBC | EXC),
    (GE_CMD_LDY0, FBC | EXC),
    (GE_CMD_LDZ0, FBC | EXC),
    (GE_CMD_LDX1, FBC | EXC),
    (GE_CMD_LDY1, FBC | EXC),
    (GE_CMD_LDZ1, FBC | EXC),
    (GE_CMD_LDX2, FBC | EXC),
    (GE_CMD_LDY2, FBC | EXC),
    (GE_CMD_LDZ2, FBC | EXC),
    (GE_CMD_LDX3, FBC | EXC),
    (GE_CMD_LDY3, FBC | EXC),
    (GE_CMD_LDZ3, FBC | EXC),
    (GE_CMD_LKA0, FBC | EXC),
    (GE_CMD_LKB0, FBC | EXC),
    (GE_CMD_LKC0, FBC | EXC),
    (GE_CMD_LKA1, FBC | EXC),
    (GE_CMD_LKB1, FBC | EXC),
    (GE_CMD_LKC1, FBC | EXC),
    (GE_CMD_LKA2, FBC | EXC),
    (GE_CMD_LKB2, FBC | EXC),
    (GE_CMD_LKC2, FBC | EXC),
    (GE_CMD_LKA3, FBC | EXC),
    (GE_CMD_LKB3, FBC | EXC),
    (GE_CMD_LKC3, FBC | EXC),
    (GE_CMD_LKS0, FBC | EXC),
    (GE_CMD_LKS1, FBC | EXC),
    (GE_CMD_LKS2, FBC | EXC),
    (GE_CMD_LKS3, FBC | EXC),
    (GE_CMD_LKO0, FBC | EXC),
    (GE_CMD_LKO1, FBC | EXC),
    (GE_CMD_LKO2, FBC | EXC),
    (GE_CMD_LKO3, FBC | EXC),
    (GE_CMD_LAC0, FBC | EXC),
    (GE_CMD_LDC0, FBC | EXC),
    (GE_CMD_LSC0, FBC | EXC),
    (GE_CMD_LAC1, FBC | EXC),
    (GE_CMD_LDC1, FBC | EXC),
    (GE_CMD_LSC1, FBC | EXC),
    (GE_CMD_LAC2, FBC | EXC),
    (GE_CMD_LDC2, FBC | EXC),
    (GE_CMD_LSC2, FBC | EXC),
    (GE_CMD_LAC3, FBC | EXC),
    (GE_CMD_LDC3, FBC | EXC),
    (GE_CMD_LSC3, FBC | EXC),
    // Ignored commands
    (GE_CMD_CLIPENABLE, 0),
    (GE_CMD_TEXFLUSH, 0),
    (GE_CMD_TEXLODSLOPE, EX),
    (GE_CMD_TEXLEVEL, EXC),
    (GE_CMD_TEXSYNC, 0),
    // Nops or arguments consumed by later commands
    (GE_CMD_NOP, 0),
    (GE_CMD_BASE, EX),
    (GE_CMD_TRANSFERSRC, 0),
    (GE_CMD_TRANSFERSRCW, 0),
    (GE_CMD_TRANSFERDST, 0),
    (GE_CMD_TRANSFERDSTW, 0),
    (GE_CMD_TRANSFERSRCPOS, 0),
    (GE_CMD_TRANSFERDSTPOS, 0),
    (GE_CMD_TRANSFERSIZE, 0),
    // Control flow and draw triggers
    (GE_CMD_OFFSETADDR, EX),
    (GE_CMD_ORIGIN, EX),
    (GE_CMD_PRIM, EX),
    (GE_CMD_JUMP, EX),
    (GE_CMD_CALL, EX),
    (GE_CMD_RET, EX),
    (GE_CMD_END, EX),
    (GE_CMD_VADDR, EX),
    (GE_CMD_IADDR, EX),
    (GE_CMD_BJUMP, EX),
    (GE_CMD_BOUNDINGBOX, EX),
    // Changing the vertex type requires a flush
    (GE_CMD_VERTEXTYPE, FBC | EXC),
    (GE_CMD_BEZIER, FB | EX),
    (GE_CMD_SPLINE, FB | EX),
    // Processed when END arrives
    (GE_CMD_SIGNAL, FB | EX),
    (GE_CMD_FINISH, FB | EX),
    // Changes that trigger data copies
    (GE_CMD_LOADCLUT, FBC | EX),
    (GE_CMD_TRANSFERSTART, FB | EX),
    // The dither table is not consumed
    (GE_CMD_DITH0, 0),
    (GE_CMD_DITH1, 0),
    (GE_CMD_DITH2, 0),
    (GE_CMD_DITH3, 0),
    // Matrix uploads handle their own flushing
    (GE_CMD_WORLDMATRIXNUMBER, EX),
    (GE_CMD_WORLDMATRIXDATA, EX),
    (GE_CMD_VIEWMATRIXNUMBER, EX),
    (GE_CMD_VIEWMATRIXDATA, EX),
    (GE_CMD_PROJMATRIXNUMBER, EX),
    (GE_CMD_PROJMATRIXDATA, EX),
    (GE_CMD_TGENMATRIXNUMBER, EX),
    (GE_CMD_TGENMATRIXDATA, EX),
    (GE_CMD_BONEMATRIXNUMBER, EX),
    (GE_CMD_BONEMATRIXDATA, EX),
    // Gaps in the opcode sequence
    (GE_CMD_UNKNOWN_03, EX),
    (GE_CMD_UNKNOWN_0D, EX),
    (GE_CMD_UNKNOWN_11, EX),
    (GE_CMD_UNKNOWN_29, EX),
    (GE_CMD_UNKNOWN_34, EX),
    (GE_CMD_UNKNOWN_35, EX),
    (GE_CMD_UNKNOWN_39, EX),
    (GE_CMD_UNKNOWN_4E, EX),
    (GE_CMD_UNKNOWN_4F, EX),
    (GE_CMD_UNKNOWN_52, EX),
    (GE_CMD_UNKNOWN_59, EX),
    (GE_CMD_UNKNOWN_5A, EX),
    (GE_CMD_UNKNOWN_B6, EX),
    (GE_CMD_UNKNOWN_B7, EX),
    (GE_CMD_UNKNOWN_D1, EX),
    (GE_CMD_UNKNOWN_ED, EX),
    (GE_CMD_UNKNOWN_EF, EX),
    (0xF0, EX),
    (0xF1, EX),
    (0xF2, EX),
    (0xF3, EX),
    (0xF4, EX),
    (0xF5, EX),
    (0xF6, EX),
    (0xF7, EX),
    (0xF8, EX),
    (0xF9, EX),
    (0xFA, EX),
    (0xFB, EX),
    (0xFC, EX),
    (0xFD, EX),
    (0xFE, EX),
    (0xFF, EX),
];

/// Flat 256-entry flag table, the hottest lookup in the interpreter.
pub struct CommandTable {
    flags: [CommandFlags; 256],
}

impl CommandTable {
    /// Build the table from the static seed, verifying it is consistent
    /// and applying the configuration-dependent optimizations.
    pub fn new(config: &GpuConfig) -> Self {
        let mut flags = [CommandFlags::empty(); 256];
        let mut seen = [false; 256];

        for &(cmd, f) in COMMAND_TABLE {
            let idx = cmd as usize;
            if seen[idx] {
                tracing::error!("Command table dupe: {:02x}", cmd);
            }
            seen[idx] = true;
            flags[idx] |= CommandFlags::from_bits_truncate(f);
        }
        for (cmd, seen) in seen.iter().enumerate().take(0xEF) {
            if !seen {
                tracing::error!("Command missing from table: {:02x}", cmd);
            }
        }

        // No need to break batches on UV scale/offset changes when they are
        // baked into the vertices by the decoder.
        if config.prescale_uv {
            for cmd in [
                GE_CMD_TEXSCALEU,
                GE_CMD_TEXSCALEV,
                GE_CMD_TEXOFFSETU,
                GE_CMD_TEXOFFSETV,
            ] {
                flags[cmd as usize] &= !CommandFlags::FLUSH_BEFORE_ON_CHANGE;
            }
        }

        // With CPU-side skinning, vertex type changes don't invalidate the
        // batched geometry.
        if config.software_skinning {
            flags[GE_CMD_VERTEXTYPE as usize] &= !CommandFlags::FLUSH_BEFORE_ON_CHANGE;
        }

        Self { flags }
    }

    #[inline(always)]
    pub fn flags(&self, op: u8) -> CommandFlags {
        self.flags[op as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_gaps_up_to_transfersize() {
        let mut seen = [false; 256];
        for &(cmd, _) in COMMAND_TABLE {
            assert!(!seen[cmd as usize], "dupe entry {:02x}", cmd);
            seen[cmd as usize] = true;
        }
        for (cmd, seen) in seen.iter().enumerate().take(0xEF) {
            assert!(seen, "missing entry {:02x}", cmd);
        }
    }

    #[test]
    fn test_default_table_flushes_on_uv_change() {
        let table = CommandTable::new(&GpuConfig::default());
        assert!(table
            .flags(GE_CMD_TEXSCALEU)
            .contains(CommandFlags::FLUSH_BEFORE_ON_CHANGE));
        assert!(table
            .flags(GE_CMD_TEXSCALEU)
            .contains(CommandFlags::EXECUTE_ON_CHANGE));
    }

    #[test]
    fn test_prescale_uv_drops_flush_only() {
        let config = GpuConfig {
            prescale_uv: true,
            ..Default::default()
        };
        let table = CommandTable::new(&config);
        for cmd in [
            GE_CMD_TEXSCALEU,
            GE_CMD_TEXSCALEV,
            GE_CMD_TEXOFFSETU,
            GE_CMD_TEXOFFSETV,
        ] {
            assert!(!table.flags(cmd).contains(CommandFlags::FLUSH_BEFORE_ON_CHANGE));
            assert!(table.flags(cmd).contains(CommandFlags::EXECUTE_ON_CHANGE));
        }
    }

    #[test]
    fn test_software_skinning_drops_vertex_type_flush() {
        let config = GpuConfig {
            software_skinning: true,
            ..Default::default()
        };
        let table = CommandTable::new(&config);
        assert!(!table
            .flags(GE_CMD_VERTEXTYPE)
            .contains(CommandFlags::FLUSH_BEFORE_ON_CHANGE));
    }

    #[test]
    fn test_draw_triggers_execute() {
        let table = CommandTable::new(&GpuConfig::default());
        assert!(table.flags(GE_CMD_PRIM).contains(CommandFlags::EXECUTE));
        assert!(table.flags(GE_CMD_BEZIER).contains(CommandFlags::FLUSH_BEFORE));
        assert!(table.flags(GE_CMD_TRANSFERSTART).contains(CommandFlags::FLUSH_BEFORE));
        assert!(table.flags(GE_CMD_NOP).is_empty());
    }
}
