//! Ring identifiers and the clockwise identifier space they live in.
use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};
use std::net::SocketAddr;

/// Default width of identifiers in bits.
pub const DEFAULT_ID_BITS: u8 = 32;
/// Largest supported identifier width in bits.
pub const MAX_ID_BITS: u8 = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A position on the ring, shared by node ids and keys.
pub struct Id(pub u32);

impl Id {
    /// Returns the raw integer value of this Id.
    pub fn to_u32(&self) -> u32 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> Id {
        Id(u32::from_be_bytes(bytes))
    }
}

impl From<u32> for Id {
    fn from(value: u32) -> Self {
        Id(value)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Identifier width must be between 1 and {MAX_ID_BITS} bits, got {0}")]
/// Returned by [IdSpace::new] for an unsupported width.
pub struct InvalidIdSpace(pub u8);

#[derive(Clone, Copy, PartialEq, Eq)]
/// The circular identifier space of `2^bits` positions.
///
/// Every ordering decision on the ring goes through [IdSpace::distance], the clockwise
/// arc length, which strictly shrinks as a position approaches its target.
pub struct IdSpace {
    bits: u8,
}

impl IdSpace {
    /// Create an identifier space of `2^bits` positions.
    pub fn new(bits: u8) -> Result<Self, InvalidIdSpace> {
        if bits == 0 || bits > MAX_ID_BITS {
            return Err(InvalidIdSpace(bits));
        }

        Ok(IdSpace { bits })
    }

    // === Getters ===

    /// Width of identifiers, and the length of every finger table, in bits.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of positions on the ring.
    pub fn size(&self) -> u64 {
        1 << self.bits
    }

    fn mask(&self) -> u64 {
        self.size() - 1
    }

    // === Constructors ===

    /// Reduce any integer modulo the ring size.
    pub fn id(&self, value: u64) -> Id {
        Id((value & self.mask()) as u32)
    }

    /// Returns `true` if `id` is a valid position in this space.
    pub fn contains(&self, id: Id) -> bool {
        (id.0 as u64) <= self.mask()
    }

    /// A uniformly random position.
    pub fn random(&self) -> Id {
        let mut rng = rand::thread_rng();
        self.id(rng.gen::<u32>() as u64)
    }

    /// Hash arbitrary bytes into the space, using the first four bytes of their SHA-1.
    pub fn hash(&self, bytes: &[u8]) -> Id {
        let digest = sha1_smol::Sha1::from(bytes).digest().bytes();

        self.id(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64)
    }

    /// The classic Chord node id: the hash of the node's address.
    pub fn from_address(&self, address: SocketAddr) -> Id {
        self.hash(address.to_string().as_bytes())
    }

    // === Ring arithmetic ===

    /// Clockwise arc length from `from` to `to`, `(to - from) mod 2^bits`.
    ///
    /// Distance to self is 0.
    /// Distance to the position just behind `from` is `2^bits - 1`.
    pub fn distance(&self, from: Id, to: Id) -> u32 {
        ((to.0 as u64 + self.size() - (from.0 as u64 & self.mask())) & self.mask()) as u32
    }

    /// Returns `true` if `x` lies in the half-open clockwise arc `(from, to]`.
    ///
    /// When `from == to` the arc covers the whole ring, which is what a lone node owns.
    pub fn in_arc(&self, x: Id, from: Id, to: Id) -> bool {
        if from == to {
            return true;
        }

        let offset = self.distance(from, x);
        offset != 0 && offset <= self.distance(from, to)
    }

    /// Returns `true` if `x` lies in the open clockwise arc `(from, to)`.
    ///
    /// When `from == to` every position except `from` itself is inside.
    pub fn in_open_arc(&self, x: Id, from: Id, to: Id) -> bool {
        if from == to {
            return x != from;
        }

        let offset = self.distance(from, x);
        offset != 0 && offset < self.distance(from, to)
    }

    /// `id + 2^i`, the position finger `i` of `id` should cover.
    pub fn finger_start(&self, id: Id, i: u8) -> Id {
        self.id(id.0 as u64 + (1u64 << i))
    }

    /// `id - 2^i + 1`.
    ///
    /// The predecessor of this position is the last node (counter-clockwise) whose
    /// finger `i` may reference `id`.
    pub fn back(&self, id: Id, i: u8) -> Id {
        self.id(id.0 as u64 + self.size() - (1u64 << i) + 1)
    }
}

impl Default for IdSpace {
    fn default() -> Self {
        IdSpace {
            bits: DEFAULT_ID_BITS,
        }
    }
}

impl Debug for IdSpace {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "IdSpace(2^{})", self.bits)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_widths() {
        assert_eq!(IdSpace::new(0), Err(InvalidIdSpace(0)));
        assert_eq!(IdSpace::new(33), Err(InvalidIdSpace(33)));
        assert!(IdSpace::new(1).is_ok());
        assert!(IdSpace::new(32).is_ok());
    }

    #[test]
    fn distance_to_self() {
        let space = IdSpace::default();
        let id = space.random();

        assert_eq!(space.distance(id, id), 0);
    }

    #[test]
    fn distance_is_clockwise() {
        let space = IdSpace::default();

        assert_eq!(space.distance(Id(10), Id(15)), 5);
        assert_eq!(space.distance(Id(15), Id(10)), u32::MAX - 4);
        assert_eq!(space.distance(Id(u32::MAX), Id(0)), 1);
    }

    #[test]
    fn distance_wraps_in_small_space() {
        let space = IdSpace::new(6).unwrap();

        assert_eq!(space.distance(Id(60), Id(2)), 6);
        assert_eq!(space.distance(Id(2), Id(60)), 58);
    }

    #[test]
    fn distance_is_strictly_monotonic_towards_target() {
        let space = IdSpace::new(8).unwrap();
        let target = Id(7);

        // Walking clockwise from 200 towards 7, every step gets strictly closer.
        let mut previous = space.distance(Id(200), target);
        let mut position = 200u64;
        while space.id(position) != target {
            position += 1;
            let current = space.distance(space.id(position), target);
            assert!(current < previous);
            previous = current;
        }
    }

    #[test]
    fn arc_membership() {
        let space = IdSpace::default();

        assert!(space.in_arc(Id(2_000_000_000), Id(50_000), Id(4_000_000_000)));
        assert!(space.in_arc(Id(4_000_000_000), Id(50_000), Id(4_000_000_000)));
        assert!(!space.in_arc(Id(50_000), Id(50_000), Id(4_000_000_000)));

        // Wrapping arc (4000000000, 0]
        assert!(space.in_arc(Id(4_100_000_000), Id(4_000_000_000), Id(0)));
        assert!(space.in_arc(Id(0), Id(4_000_000_000), Id(0)));
        assert!(!space.in_arc(Id(1), Id(4_000_000_000), Id(0)));
    }

    #[test]
    fn lone_node_arc_covers_everything() {
        let space = IdSpace::default();

        assert!(space.in_arc(Id(42), Id(7), Id(7)));
        assert!(space.in_arc(Id(7), Id(7), Id(7)));

        assert!(space.in_open_arc(Id(42), Id(7), Id(7)));
        assert!(!space.in_open_arc(Id(7), Id(7), Id(7)));
    }

    #[test]
    fn open_arc_excludes_endpoints() {
        let space = IdSpace::new(6).unwrap();

        assert!(space.in_open_arc(Id(1), Id(60), Id(5)));
        assert!(!space.in_open_arc(Id(60), Id(60), Id(5)));
        assert!(!space.in_open_arc(Id(5), Id(60), Id(5)));
    }

    #[test]
    fn finger_starts() {
        let space = IdSpace::new(6).unwrap();

        let starts: Vec<u32> = (0..6).map(|i| space.finger_start(Id(8), i).0).collect();
        assert_eq!(starts, vec![9, 10, 12, 16, 24, 40]);

        assert_eq!(space.finger_start(Id(60), 3), Id(4));
    }

    #[test]
    fn back_is_inverse_of_finger_start_plus_one() {
        let space = IdSpace::new(6).unwrap();

        for i in 0..6 {
            let back = space.back(Id(3), i);
            assert_eq!(space.finger_start(back, i), Id(4));
        }
    }

    #[test]
    fn hash_is_stable_and_in_range() {
        let space = IdSpace::new(10).unwrap();

        let a = space.hash(b"hello");
        let b = space.hash(b"hello");

        assert_eq!(a, b);
        assert!(space.contains(a));
        assert_ne!(space.hash(b"hello"), space.hash(b"world!"));
    }
}
