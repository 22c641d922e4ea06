// SPDX-License-Identifier: GPL-2.0

//! Core BPF types and constants
//!
//! Kernel ABI values used by the loader: map/program/attach type enums,
//! the instruction encoding, and the handful of opcode and flag constants
//! needed to patch map references into instruction streams.

// ============================================================================
// Constants
// ============================================================================

/// Size of a single BPF instruction in bytes.
pub const BPF_INSN_SIZE: usize = 8;

/// Maximum length of a map or program name passed to the kernel,
/// including the trailing NUL.
pub const BPF_OBJ_NAME_LEN: usize = 16;

/// Size of the buffer handed to the kernel for verifier output.
pub const BPF_LOG_BUF_SIZE: usize = 0xfffff;

/// BPF instruction class: load from immediate
pub const BPF_LD: u8 = 0x00;
/// BPF size: 64-bit double-word
pub const BPF_DW: u8 = 0x18;
/// BPF mode: immediate value
pub const BPF_IMM: u8 = 0x00;

/// Opcode of the two-slot 64-bit immediate load, the only instruction a
/// map relocation may target.
pub const BPF_LD_IMM64: u8 = BPF_LD | BPF_IMM | BPF_DW;

/// Pseudo source register tag: the immediate holds a map file descriptor.
pub const BPF_PSEUDO_MAP_FD: u8 = 1;

/// Map flag: map is read-only from the program side.
pub const BPF_F_RDONLY_PROG: u32 = 1 << 7;

// ============================================================================
// Map Types
// ============================================================================

/// Kernel BPF map types (`enum bpf_map_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum BpfMapType {
    /// Unspecified map type
    #[default]
    Unspec = 0,
    /// Hash table map
    Hash = 1,
    /// Array map
    Array = 2,
    /// Program array (tail calls)
    ProgArray = 3,
    /// Perf event array
    PerfEventArray = 4,
    /// Per-CPU hash table
    PercpuHash = 5,
    /// Per-CPU array
    PercpuArray = 6,
    /// Stack trace map
    StackTrace = 7,
    /// Cgroup array
    CgroupArray = 8,
    /// LRU hash table
    LruHash = 9,
    /// Per-CPU LRU hash table
    LruPercpuHash = 10,
    /// Longest-prefix-match trie
    LpmTrie = 11,
    /// Array of maps
    ArrayOfMaps = 12,
    /// Hash of maps
    HashOfMaps = 13,
    /// Device map (XDP redirect)
    Devmap = 14,
    /// Socket map
    Sockmap = 15,
    /// CPU map (XDP redirect)
    Cpumap = 16,
    /// AF_XDP socket map
    Xskmap = 17,
    /// Socket hash
    Sockhash = 18,
    /// Cgroup storage
    CgroupStorage = 19,
    /// Reuseport socket array
    ReuseportSockarray = 20,
    /// Per-CPU cgroup storage
    PercpuCgroupStorage = 21,
    /// Queue map
    Queue = 22,
    /// Stack map
    Stack = 23,
    /// Socket-local storage
    SkStorage = 24,
    /// Hashed device map (XDP redirect)
    DevmapHash = 25,
    /// Struct-ops map
    StructOps = 26,
    /// Ring buffer
    Ringbuf = 27,
    /// Inode-local storage
    InodeStorage = 28,
    /// Task-local storage
    TaskStorage = 29,
    /// Bloom filter
    BloomFilter = 30,
    /// User-space ring buffer
    UserRingbuf = 31,
    /// Cgroup-local storage
    CgrpStorage = 32,
    /// Arena map
    Arena = 33,
}

impl BpfMapType {
    /// Convert a raw kernel value into a map type, `Unspec` for anything
    /// this loader does not know about.
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => BpfMapType::Hash,
            2 => BpfMapType::Array,
            3 => BpfMapType::ProgArray,
            4 => BpfMapType::PerfEventArray,
            5 => BpfMapType::PercpuHash,
            6 => BpfMapType::PercpuArray,
            7 => BpfMapType::StackTrace,
            8 => BpfMapType::CgroupArray,
            9 => BpfMapType::LruHash,
            10 => BpfMapType::LruPercpuHash,
            11 => BpfMapType::LpmTrie,
            12 => BpfMapType::ArrayOfMaps,
            13 => BpfMapType::HashOfMaps,
            14 => BpfMapType::Devmap,
            15 => BpfMapType::Sockmap,
            16 => BpfMapType::Cpumap,
            17 => BpfMapType::Xskmap,
            18 => BpfMapType::Sockhash,
            19 => BpfMapType::CgroupStorage,
            20 => BpfMapType::ReuseportSockarray,
            21 => BpfMapType::PercpuCgroupStorage,
            22 => BpfMapType::Queue,
            23 => BpfMapType::Stack,
            24 => BpfMapType::SkStorage,
            25 => BpfMapType::DevmapHash,
            26 => BpfMapType::StructOps,
            27 => BpfMapType::Ringbuf,
            28 => BpfMapType::InodeStorage,
            29 => BpfMapType::TaskStorage,
            30 => BpfMapType::BloomFilter,
            31 => BpfMapType::UserRingbuf,
            32 => BpfMapType::CgrpStorage,
            33 => BpfMapType::Arena,
            _ => BpfMapType::Unspec,
        }
    }
}

// ============================================================================
// Program Types
// ============================================================================

/// Kernel BPF program types (`enum bpf_prog_type`), limited to the kinds a
/// network loader ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum BpfProgType {
    /// Unspecified program type; sections of this type are not loaded
    #[default]
    Unspec = 0,
    /// Socket filter
    SocketFilter = 1,
    /// tc classifier
    SchedCls = 3,
    /// tc action
    SchedAct = 4,
    /// XDP
    Xdp = 6,
    /// Cgroup skb (inet ingress/egress)
    CgroupSkb = 8,
    /// Cgroup socket
    CgroupSock = 9,
    /// Lightweight tunnel input
    LwtIn = 10,
    /// Lightweight tunnel output
    LwtOut = 11,
    /// Lightweight tunnel transmit
    LwtXmit = 12,
    /// Socket ops
    SockOps = 13,
    /// Cgroup socket address (bind/connect/sendmsg/recvmsg)
    CgroupSockAddr = 18,
    /// Lightweight tunnel seg6local
    LwtSeg6local = 19,
    /// Cgroup sysctl
    CgroupSysctl = 23,
    /// Cgroup getsockopt/setsockopt
    CgroupSockopt = 25,
}

// ============================================================================
// Attach Types
// ============================================================================

/// Kernel BPF expected attach types (`enum bpf_attach_type`).
///
/// `Unspec` shares the value of `BPF_CGROUP_INET_INGRESS` (0); the kernel
/// ignores the field for program kinds that take no attach type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum BpfAttachType {
    /// No specific attach type
    #[default]
    Unspec = 0,
    /// Cgroup inet egress
    CgroupInetEgress = 1,
    /// Cgroup inet socket creation
    CgroupInetSockCreate = 2,
    /// Cgroup sock_ops
    CgroupSockOps = 3,
    /// Cgroup IPv4 bind
    CgroupInet4Bind = 8,
    /// Cgroup IPv6 bind
    CgroupInet6Bind = 9,
    /// Cgroup IPv4 connect
    CgroupInet4Connect = 10,
    /// Cgroup IPv6 connect
    CgroupInet6Connect = 11,
    /// Cgroup IPv4 post-bind
    CgroupInet4PostBind = 12,
    /// Cgroup IPv6 post-bind
    CgroupInet6PostBind = 13,
    /// Cgroup UDPv4 sendmsg
    CgroupUdp4Sendmsg = 14,
    /// Cgroup UDPv6 sendmsg
    CgroupUdp6Sendmsg = 15,
    /// Cgroup sysctl
    CgroupSysctl = 18,
    /// Cgroup UDPv4 recvmsg
    CgroupUdp4Recvmsg = 19,
    /// Cgroup UDPv6 recvmsg
    CgroupUdp6Recvmsg = 20,
    /// Cgroup getsockopt
    CgroupGetsockopt = 21,
    /// Cgroup setsockopt
    CgroupSetsockopt = 22,
    /// Cgroup inet socket release
    CgroupInetSockRelease = 34,
}

// ============================================================================
// BPF Instruction
// ============================================================================

/// A single BPF instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BpfInsn {
    /// Opcode
    pub code: u8,
    /// Destination register
    pub dst_reg: u8,
    /// Source register
    pub src_reg: u8,
    /// Offset
    pub off: i16,
    /// Immediate value
    pub imm: i32,
}

impl BpfInsn {
    /// Create a new instruction.
    pub fn new(code: u8, dst_reg: u8, src_reg: u8, off: i16, imm: i32) -> Self {
        Self {
            code,
            dst_reg,
            src_reg,
            off,
            imm,
        }
    }

    /// Decode an instruction from its 8-byte wire form.
    pub fn from_bytes(raw: &[u8; BPF_INSN_SIZE]) -> Self {
        Self {
            code: raw[0],
            dst_reg: raw[1] & 0x0f,
            src_reg: raw[1] >> 4,
            off: i16::from_le_bytes([raw[2], raw[3]]),
            imm: i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    /// Encode an instruction into its 8-byte wire form.
    pub fn to_bytes(&self) -> [u8; BPF_INSN_SIZE] {
        let off = self.off.to_le_bytes();
        let imm = self.imm.to_le_bytes();
        [
            self.code,
            (self.dst_reg & 0x0f) | (self.src_reg << 4),
            off[0],
            off[1],
            imm[0],
            imm[1],
            imm[2],
            imm[3],
        ]
    }

    /// Check whether a map relocation may target this instruction.
    pub fn is_ld_imm64(&self) -> bool {
        self.code == BPF_LD_IMM64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insn_roundtrip() {
        let insn = BpfInsn::new(BPF_LD_IMM64, 1, 0, 0, 0x1234_5678);
        let raw = insn.to_bytes();
        assert_eq!(BpfInsn::from_bytes(&raw), insn);
    }

    #[test]
    fn test_insn_register_packing() {
        let insn = BpfInsn::new(0x07, 3, 2, -1, 7);
        let raw = insn.to_bytes();
        assert_eq!(raw[1], 0x23);
        let back = BpfInsn::from_bytes(&raw);
        assert_eq!(back.dst_reg, 3);
        assert_eq!(back.src_reg, 2);
        assert_eq!(back.off, -1);
    }

    #[test]
    fn test_map_type_from_u32() {
        assert_eq!(BpfMapType::from_u32(2), BpfMapType::Array);
        assert_eq!(BpfMapType::from_u32(27), BpfMapType::Ringbuf);
        assert_eq!(BpfMapType::from_u32(999), BpfMapType::Unspec);
    }
}
