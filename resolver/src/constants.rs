/// anvil / hardhat
pub const LOCAL_CHAIN_IDS: [u64; 2] = [1337, 31337];

/// Chains running the zkSync stack, priced through `zks_estimateFee`
pub const ZKSYNC_STACK_CHAIN_IDS: &[u64] = &[
    300,       // zkSync Sepolia
    302,       // zkCandy Sepolia
    324,       // zkSync Era
    388,       // Cronos zkEVM
    282,       // Cronos zkEVM testnet
    232,       // Lens
    37111,     // Lens Sepolia
    2741,      // Abstract
    11124,     // Abstract testnet
    50104,     // Sophon
    531050104, // Sophon testnet
    61166,     // Treasure
    978658,    // Treasure Topaz
    4457845,   // ZERO testnet
    543210,    // ZERO
];

/// Chains whose nodes misreport EIP-1559 fee data
pub const LEGACY_FEE_CHAIN_IDS: &[u64] = &[
    28,         // Boba Rinkeby
    842,        // Taraxa testnet
    2016,       // MainnetZ
    9372,       // Oasys testnet
    31911,      // Nexi
    40875,      // Dexalot
    1828369849, // Mynt
    1942999413, // Humanode testnet
    1952959480, // Lumia testnet
];

/// Chains without EIP-1559 support at all
pub const NO_EIP1559_CHAIN_IDS: [u64; 2] = [220, 1220];

/// Celo family; the priority fee is pinned to the max fee
pub const CELO_CHAIN_IDS: [u64; 3] = [42220, 44787, 62320];

pub const DEFAULT_FEE_BUMP_PERCENT: u32 = 10;

/// Minimum priority fee on zkSync-stack chains that report zero
pub const MIN_VARIANT_PRIORITY_FEE: u128 = 1;
