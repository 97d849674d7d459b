/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

/// Clock hand for second chance victim selection.
///
/// The hand survives between calls, the next search continues after the
/// last victim.
pub(crate) struct FrameClock {
    hand: usize,
}

impl FrameClock {
    pub(crate) fn new() -> Self {
        Self { hand: 0 }
    }

    #[cfg(test)]
    pub(crate) fn hand(&self) -> usize {
        self.hand
    }

    /// Searches for a victim among `len` slots.
    ///
    /// `candidate` tells if a slot may be evicted at all, `test_and_clear`
    /// returns the accessed bit of a slot and clears it.
    /// Gives up after the hand went around twice.
    pub(crate) fn next<C, A>(&mut self, len: usize, candidate: C, mut test_and_clear: A) -> Option<usize>
    where
        C: Fn(usize) -> bool,
        A: FnMut(usize) -> bool,
    {
        if len == 0 {
            return None;
        }
        if self.hand >= len {
            self.hand = 0;
        }

        let start = self.hand;
        let mut iterations = 0;

        loop {
            // accessed frames get their bit cleared and another chance
            if candidate(self.hand) && !test_and_clear(self.hand) {
                let victim = self.hand;
                self.hand = (self.hand + 1) % len;
                return Some(victim);
            }

            self.hand = (self.hand + 1) % len;

            if self.hand == start {
                iterations += 1;
                if iterations == 2 {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::FrameClock;

    fn run(clock: &mut FrameClock, valid: &[bool], accessed: &mut [bool]) -> Option<usize> {
        clock.next(
            valid.len(),
            |i| valid[i],
            |i| core::mem::replace(&mut accessed[i], false),
        )
    }

    #[test]
    fn test_second_chance() {
        let mut clock = FrameClock::new();
        let valid = [true; 4];
        let mut accessed = [true, false, true, false];

        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(1));
        assert_eq!(clock.hand(), 2);
        // bit of frame 0 was cleared on the first sweep
        assert_eq!(accessed, [false, false, true, false]);

        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(3));
        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(0));
        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(1));
        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(2));
    }

    #[test]
    fn test_all_accessed() {
        let mut clock = FrameClock::new();
        let valid = [true; 3];
        let mut accessed = [true; 3];

        // first pass clears every bit, second pass takes the first frame
        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(0));
    }

    #[test]
    fn test_no_candidates() {
        let mut clock = FrameClock::new();
        let valid = [false; 5];
        let mut accessed = [false; 5];
        assert_eq!(run(&mut clock, &valid, &mut accessed), None);

        assert_eq!(run(&mut clock, &[], &mut []), None);

        let valid = [false, true, false];
        let mut accessed = [false; 3];
        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(1));
        assert_eq!(run(&mut clock, &valid, &mut accessed), Some(1));
    }
}
