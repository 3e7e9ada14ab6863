use memoizer::{Memo, MemoActor};

use crate::TestCompute;

memoizer_tests!(lock, Memo::<String, TestCompute>::new);
memoizer_tests!(actor, MemoActor::<String, TestCompute>::new);
