macro_rules! impl_cell_vec {
    ($vec_name:ident, $idx_name:ident, $dbg_prefix:expr) => {
        impl std::fmt::Debug for $idx_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $dbg_prefix, self.0)
            }
        }

        impl $idx_name {
            /// Wraps a raw label.
            pub const fn new(label: u32) -> Self {
                Self(label)
            }

            /// The raw label value.
            pub const fn label(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $idx_name {
            fn from(label: u32) -> Self {
                Self(label)
            }
        }

        #[allow(dead_code)]
        impl<T> $vec_name<T> {
            /// Creates an empty arena.
            pub fn new() -> Self {
                Self {
                    slots: Vec::new(),
                    live: 0,
                }
            }

            /// Creates an arena whose slot 0 is reserved (permanently absent).
            pub fn with_reserved_slot() -> Self {
                Self {
                    slots: vec![None],
                    live: 0,
                }
            }

            /// The number of live cells.
            pub fn len(&self) -> usize {
                self.live
            }

            /// Are there no live cells?
            pub fn is_empty(&self) -> bool {
                self.live == 0
            }

            /// One past the largest label ever handed out; usable as a LUT size.
            pub fn slot_count(&self) -> usize {
                self.slots.len()
            }

            /// Claims the next label for `value`.
            pub fn push(&mut self, value: T) -> $idx_name {
                self.slots.push(Some(value));
                self.live += 1;
                $idx_name((self.slots.len() - 1) as u32)
            }

            /// Claims the next label but leaves its slot absent.
            pub fn push_absent(&mut self) -> $idx_name {
                self.slots.push(None);
                $idx_name((self.slots.len() - 1) as u32)
            }

            /// Is `idx` a live cell?
            pub fn contains(&self, idx: $idx_name) -> bool {
                self.slots
                    .get(idx.0 as usize)
                    .is_some_and(|slot| slot.is_some())
            }

            /// The cell at `idx`, if it is live.
            pub fn get(&self, idx: $idx_name) -> Option<&T> {
                self.slots.get(idx.0 as usize)?.as_ref()
            }

            /// Mutable access to the cell at `idx`, if it is live.
            pub fn get_mut(&mut self, idx: $idx_name) -> Option<&mut T> {
                self.slots.get_mut(idx.0 as usize)?.as_mut()
            }

            /// Uninitializes the cell at `idx`, returning its value.
            ///
            /// The label is not reused; the slot stays absent.
            pub fn release(&mut self, idx: $idx_name) -> Option<T> {
                let value = self.slots.get_mut(idx.0 as usize)?.take();
                if value.is_some() {
                    self.live -= 1;
                }
                value
            }

            /// Re-occupies a previously released slot.
            ///
            /// Panics if the slot does not exist or is still live.
            pub fn restore(&mut self, idx: $idx_name, value: T) {
                let slot = &mut self.slots[idx.0 as usize];
                assert!(slot.is_none(), "restore() into a live slot");
                *slot = Some(value);
                self.live += 1;
            }

            /// Iterates over the labels of all live cells, in label order.
            pub fn indices(&self) -> impl Iterator<Item = $idx_name> + '_ {
                self.slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.is_some())
                    .map(|(i, _)| $idx_name(i as u32))
            }

            /// Iterates over all live cells with their labels, in label order.
            pub fn iter(&self) -> impl Iterator<Item = ($idx_name, &T)> + '_ {
                self.slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| slot.as_ref().map(|v| ($idx_name(i as u32), v)))
            }

            /// Like [`iter`](Self::iter), with mutable cell access.
            pub fn iter_mut(&mut self) -> impl Iterator<Item = ($idx_name, &mut T)> + '_ {
                self.slots
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(i, slot)| slot.as_mut().map(|v| ($idx_name(i as u32), v)))
            }
        }

        impl<T> Default for $vec_name<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T> std::ops::Index<$idx_name> for $vec_name<T> {
            type Output = T;

            fn index(&self, index: $idx_name) -> &Self::Output {
                self.slots[index.0 as usize]
                    .as_ref()
                    .expect("indexed an uninitialized cell")
            }
        }

        impl<T> std::ops::IndexMut<$idx_name> for $vec_name<T> {
            fn index_mut(&mut self, index: $idx_name) -> &mut T {
                self.slots[index.0 as usize]
                    .as_mut()
                    .expect("indexed an uninitialized cell")
            }
        }

        impl<T: std::fmt::Debug> std::fmt::Debug for $vec_name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut map = f.debug_map();
                for (idx, value) in self.iter() {
                    map.entry(&idx, value);
                }
                map.finish()
            }
        }
    };
}
