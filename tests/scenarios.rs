//! End-to-end behaviour of `pyground::run` on complete programs

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pyground::{run, InterruptHandle, Outcome, Sandbox, SandboxConfig};

const GRADING: &str = include_str!("programs/grading.py");
const LEAP_YEAR: &str = include_str!("programs/leap_year.py");

#[test]
fn test_grading_program() {
    assert_eq!(run(GRADING, "86"), ("B\n".to_string(), String::new()));
    assert_eq!(run(GRADING, "101").0, "Invalid\n");
    assert_eq!(run(GRADING, "-1").0, "Invalid\n");
    assert_eq!(run(GRADING, "  95  ").0, "A\n");
    assert_eq!(run(GRADING, "49").0, "F\n");
    // a non-number is caught by the program's own handler
    assert_eq!(run(GRADING, "eighty"), ("Invalid\n".to_string(), String::new()));
    // so is running out of input
    assert_eq!(run(GRADING, ""), ("Invalid\n".to_string(), String::new()));
}

#[test]
fn test_leap_year_program() {
    assert_eq!(run(LEAP_YEAR, "2024"), ("Leap Year\n".to_string(), String::new()));
    assert_eq!(run(LEAP_YEAR, "1900").0, "Not Leap Year\n");
    assert_eq!(run(LEAP_YEAR, "2000").0, "Leap Year\n");
    assert_eq!(run(LEAP_YEAR, "2023").0, "Not Leap Year\n");
}

#[test]
fn test_exhausted_input() {
    let source = "a = int(input())\nprint('got', a)\nb = int(input())\nprint(a + b)\n";
    let (stdout, stderr) = run(source, "5");
    assert_eq!(stdout, "got 5\n");
    assert_eq!(
        stderr,
        "Traceback (most recent call last):\n  File \"<string>\", line 3, in <module>\n\
         EOFError: No more stdin lines available\n"
    );
}

#[test]
fn test_lines_come_back_in_order() {
    let source = "while True:\n    try:\n        print(repr(input()))\n    except EOFError as e:\n        print('done:', e)\n        break\n";
    let (stdout, stderr) = run(source, "first\n\nthird  \r\nlast");
    assert_eq!(stderr, "");
    assert_eq!(
        stdout,
        "'first'\n''\n'third  '\n'last'\ndone: No more stdin lines available\n"
    );
}

#[test]
fn test_prompt_is_written_inline() {
    let (stdout, _) = run("x = input('Score: ')\nprint()\nprint(x)\n", "12");
    assert_eq!(stdout, "Score: \n12\n");
}

#[test]
fn test_runs_are_idempotent() {
    let source = "data = [int(x) for x in input().split()]\nprint(sorted(data), sum(data) / len(data))\nprint(1 / (data[0] - 3))\n";
    let first = run(source, "3 1 2");
    let second = run(source, "3 1 2");
    assert_eq!(first, second);
    assert_eq!(first.0, "[1, 2, 3] 2.0\n");
    assert!(first.1.ends_with("ZeroDivisionError: division by zero\n"));
}

#[test]
fn test_containment() {
    let cases = [
        ("import os\n", "ImportError: __import__ not found\n"),
        ("from os import path\n", "ImportError: __import__ not found\n"),
        ("open('secrets.txt')\n", "NameError: name 'open' is not defined\n"),
        ("__import__('os')\n", "NameError: name '__import__' is not defined\n"),
        ("eval('1 + 1')\n", "NameError: name 'eval' is not defined\n"),
        ("print(__builtins__)\n", "NameError: name '__builtins__' is not defined\n"),
        ("exit()\n", "NameError: name 'exit' is not defined\n"),
        ("class A:\n    pass\n", "NameError: __build_class__ not found\n"),
        ("print(().__class__)\n", "AttributeError: 'tuple' object has no attribute '__class__'\n"),
    ];
    for (source, expected) in cases {
        let (stdout, stderr) = run(source, "");
        assert_eq!(stdout, "", "{}", source);
        assert!(stderr.starts_with("Traceback (most recent call last):\n"), "{}", source);
        assert!(stderr.ends_with(expected), "{}: {}", source, stderr);
    }
}

#[test]
fn test_system_exit_is_not_reachable_by_name() {
    let (stdout, stderr) = run("print('before')\nraise SystemExit(1)\nprint('after')\n", "");
    assert_eq!(stdout, "before\n");
    assert!(stderr.ends_with("NameError: name 'SystemExit' is not defined\n"), "{}", stderr);
}

#[test]
fn test_fault_inside_function() {
    let source = "def half(n):\n    return 10 / n\nprint('start')\nprint(half(0))\n";
    let (stdout, stderr) = run(source, "");
    assert_eq!(stdout, "start\n");
    assert_eq!(
        stderr,
        "Traceback (most recent call last):\n  File \"<string>\", line 4, in <module>\n  \
         File \"<string>\", line 2, in half\nZeroDivisionError: division by zero\n"
    );
}

#[test]
fn test_syntax_error_report() {
    let (stdout, stderr) = run("print('ok')\nif x > 1\n    print(x)\n", "");
    assert_eq!(stdout, "");
    assert!(stderr.starts_with("  File \"<string>\", line 2\n    if x > 1\n"), "{}", stderr);
    assert!(stderr.contains("\nSyntaxError: "), "{}", stderr);
    assert_eq!(stderr.lines().count(), 4, "{}", stderr);
}

#[test]
fn test_recursion_limit() {
    let source = "def down(n):\n    return down(n + 1)\ndown(0)\n";
    let (_, stderr) = run(source, "");
    assert!(stderr.contains("[Previous line repeated"), "{}", stderr);
    assert!(stderr.ends_with("RecursionError: maximum recursion depth exceeded\n"), "{}", stderr);
}

#[test]
fn test_timeout_stops_infinite_loop() {
    let sandbox = Sandbox::new(SandboxConfig {
        timeout: Some(Duration::from_millis(200)),
        ..SandboxConfig::default()
    });
    let report = sandbox.run("print('tick')\nwhile True:\n    pass\n", "");
    assert_eq!(report.outcome, Outcome::TimedOut);
    assert_eq!(report.stdout, "tick\n");
    assert!(report.stderr.starts_with("TimeoutError: execution exceeded the time limit"));
}

#[test]
fn test_concurrent_runs_keep_separate_output() {
    let workers: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                let source = "n = int(input())\nfor _ in range(200):\n    print(n)\n";
                (i, run(source, &i.to_string()))
            })
        })
        .collect();
    for worker in workers {
        let (i, (stdout, stderr)) = worker.join().unwrap();
        assert_eq!(stderr, "");
        assert_eq!(stdout, format!("{}\n", i).repeat(200));
    }
}

#[test]
fn test_shared_sandbox_serves_concurrent_runs() {
    let sandbox = Arc::new(Sandbox::default());
    let stopper = InterruptHandle::new();
    let spinner = {
        let sandbox = Arc::clone(&sandbox);
        let stopper = stopper.clone();
        thread::spawn(move || sandbox.run_with("print('spinning')\nwhile True:\n    pass\n", "", &stopper))
    };
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let sandbox = Arc::clone(&sandbox);
            thread::spawn(move || {
                let source = "n = int(input())\ntotal = 0\nfor _ in range(2000):\n    total += n\nprint(n, total)\n";
                (i, sandbox.run_with(source, &i.to_string(), &InterruptHandle::new()))
            })
        })
        .collect();
    for worker in workers {
        let (i, report) = worker.join().unwrap();
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.stdout, format!("{} {}\n", i, i * 2000));
        assert_eq!(report.stderr, "");
    }

    // Only the spinning run is stopped; the others already finished cleanly
    while stopper.active_runs() == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    stopper.interrupt();
    let report = spinner.join().unwrap();
    assert_eq!(report.outcome, Outcome::Interrupted);
    assert_eq!(report.stdout, "spinning\n");
}

#[test]
fn test_huge_padding_is_a_memory_error() {
    let source = "try:\n    'x'.center(10 ** 10)\nexcept Exception as e:\n    print(type(e).__name__)\n\
                  print('-'.ljust(3, '*'))\nprint(f'{7:>{10 ** 10}}')\n";
    let (stdout, stderr) = run(source, "");
    assert_eq!(stdout, "MemoryError\n-**\n");
    assert_eq!(
        stderr,
        "Traceback (most recent call last):\n  File \"<string>\", line 6, in <module>\nMemoryError\n"
    );
}

#[test]
fn test_integers_past_64_bits() {
    let source = "n = int(input())\nf = 1\nfor i in range(2, n + 1):\n    f *= i\nprint(f)\n\
                  print(2 ** 64, 2 ** 64 - 1 == 18446744073709551615, 2 ** 64 // 3)\nprint(-(2 ** 63) - 1)\n";
    let (stdout, stderr) = run(source, "25");
    assert_eq!(stderr, "");
    assert_eq!(
        stdout,
        "15511210043330985984000000\n18446744073709551616 True 6148914691236517205\n-9223372036854775809\n"
    );
}

#[test]
fn test_generators_named_values_and_dict_union() {
    let source = "def gen(n):\n    for i in range(n):\n        yield i*i\nprint(list(gen(4)), sum(gen(10)))\n\
                  while (word := input()) != 'stop':\n    print(word.upper())\n\
                  print({'a': 1} | {'b': 2})\n";
    let (stdout, stderr) = run(source, "hi\nthere\nstop\nignored");
    assert_eq!(stderr, "");
    assert_eq!(stdout, "[0, 1, 4, 9] 285\nHI\nTHERE\n{'a': 1, 'b': 2}\n");
}

#[test]
fn test_mixed_indentation_is_a_tab_error() {
    let (stdout, stderr) = run("if True:\n        x = 1\n\tprint(x)\n", "");
    assert_eq!(stdout, "");
    assert_eq!(
        stderr,
        "  File \"<string>\", line 3\n    print(x)\nTabError: inconsistent use of tabs and spaces in indentation\n"
    );
}
